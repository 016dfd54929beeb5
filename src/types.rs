use crate::error::CommandError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

// ============================================================================
// DIRECTIONS
// ============================================================================

/// One signaled traffic approach. Declaration order is the round-robin order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::North => 0,
            Self::East => 1,
            Self::South => 2,
            Self::West => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::North => "NORTH",
            Self::East => "EAST",
            Self::South => "SOUTH",
            Self::West => "WEST",
        }
    }

    /// Next direction in round-robin order (wraps West → North)
    pub fn next(self) -> Direction {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NORTH" | "N" => Ok(Self::North),
            "EAST" | "E" => Ok(Self::East),
            "SOUTH" | "S" => Ok(Self::South),
            "WEST" | "W" => Ok(Self::West),
            _ => Err(CommandError::UnknownDirection(s.to_string())),
        }
    }
}

/// Fixed-size per-direction table indexed by [`Direction`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DirectionMap<T> {
    values: [T; 4],
}

impl<T: Copy> DirectionMap<T> {
    pub fn filled(value: T) -> Self {
        Self { values: [value; 4] }
    }
}

impl<T> DirectionMap<T> {
    pub fn from_fn(mut f: impl FnMut(Direction) -> T) -> Self {
        Self {
            values: Direction::ALL.map(&mut f),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Direction, &T)> {
        Direction::ALL.iter().copied().zip(self.values.iter())
    }
}

impl<T> Index<Direction> for DirectionMap<T> {
    type Output = T;

    fn index(&self, dir: Direction) -> &T {
        &self.values[dir.index()]
    }
}

impl<T> IndexMut<Direction> for DirectionMap<T> {
    fn index_mut(&mut self, dir: Direction) -> &mut T {
        &mut self.values[dir.index()]
    }
}

/// Live vehicle count per direction
pub type DirectionCounts = DirectionMap<usize>;

impl DirectionMap<usize> {
    pub fn max_count(&self) -> usize {
        self.values.iter().copied().max().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.values.iter().sum()
    }
}

// ============================================================================
// LIGHTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightState {
    Red,
    RedYellow,
    Green,
    Yellow,
}

impl LightState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "RED",
            Self::RedYellow => "RED_YELLOW",
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
        }
    }

    pub fn is_red(&self) -> bool {
        matches!(self, Self::Red)
    }

    pub fn output(&self) -> ActuatorOutput {
        match self {
            Self::Red => ActuatorOutput::Red,
            Self::RedYellow => ActuatorOutput::RedYellow,
            Self::Green => ActuatorOutput::Green,
            Self::Yellow => ActuatorOutput::Yellow,
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LightState {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace(['+', '-', ' '], "_").as_str() {
            "RED" => Ok(Self::Red),
            "RED_YELLOW" => Ok(Self::RedYellow),
            "GREEN" => Ok(Self::Green),
            "YELLOW" => Ok(Self::Yellow),
            _ => Err(CommandError::InvalidState(s.to_string())),
        }
    }
}

/// What the physical output of one direction shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActuatorOutput {
    Red,
    RedYellow,
    Green,
    Yellow,
    Off,
}

// ============================================================================
// CONTROLLER MODE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControllerMode {
    #[default]
    Auto,
    Manual,
    Simple,
    Emergency,
}

impl ControllerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
            Self::Simple => "SIMPLE",
            Self::Emergency => "EMERGENCY",
        }
    }
}

impl fmt::Display for ControllerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerMode {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(Self::Auto),
            "MANUAL" => Ok(Self::Manual),
            "SIMPLE" => Ok(Self::Simple),
            "EMERGENCY" => Ok(Self::Emergency),
            _ => Err(CommandError::InvalidMode(s.to_string())),
        }
    }
}

// ============================================================================
// DETECTIONS
// ============================================================================

/// Detector output classes the engine understands (COCO ids).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectClass {
    Person,
    Car,
    Motorcycle,
    Bus,
    Truck,
    TrafficLight,
    Other(u32),
}

impl ObjectClass {
    pub fn from_coco_id(id: u32) -> Self {
        match id {
            0 => Self::Person,
            2 => Self::Car,
            3 => Self::Motorcycle,
            5 => Self::Bus,
            7 => Self::Truck,
            9 => Self::TrafficLight,
            other => Self::Other(other),
        }
    }

    pub fn coco_id(&self) -> u32 {
        match self {
            Self::Person => 0,
            Self::Car => 2,
            Self::Motorcycle => 3,
            Self::Bus => 5,
            Self::Truck => 7,
            Self::TrafficLight => 9,
            Self::Other(id) => *id,
        }
    }

    /// Classes that contribute to per-direction vehicle counts
    pub fn is_countable_vehicle(&self) -> bool {
        matches!(self, Self::Car | Self::Motorcycle | Self::Bus | Self::Truck)
    }
}

/// Axis-aligned box `[x1, y1, x2, y2]` in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) * 0.5, (self.y1 + self.y2) * 0.5)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Clamp into `frame` and reorder corners. Returns `None` for NaN or
    /// degenerate boxes, which callers treat as "no signal".
    pub fn sanitized(&self, frame: FrameGeometry) -> Option<BBox> {
        let coords = [self.x1, self.y1, self.x2, self.y2];
        if coords.iter().any(|c| !c.is_finite()) {
            return None;
        }
        let (x1, x2) = (self.x1.min(self.x2), self.x1.max(self.x2));
        let (y1, y2) = (self.y1.min(self.y2), self.y1.max(self.y2));
        let clamped = BBox {
            x1: x1.clamp(0.0, frame.width),
            y1: y1.clamp(0.0, frame.height),
            x2: x2.clamp(0.0, frame.width),
            y2: y2.clamp(0.0, frame.height),
        };
        if clamped.area() <= 0.0 {
            None
        } else {
            Some(clamped)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: f32,
    pub height: f32,
}

impl FrameGeometry {
    /// Geometry of a normalized `[0,1]²` frame
    pub const UNIT: FrameGeometry = FrameGeometry {
        width: 1.0,
        height: 1.0,
    };

    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// One detector output for one frame. Boxes are normalized to `[0,1]²`
/// unless a caller says otherwise through [`FrameGeometry`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: ObjectClass,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    pub fn new(class: ObjectClass, confidence: f32, bbox: BBox) -> Self {
        Self {
            class,
            confidence,
            bbox,
        }
    }
}

// ============================================================================
// ZONES & PEDESTRIANS
// ============================================================================

/// Normalized detection region for one direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub direction: Direction,
    /// `[x1, y1, x2, y2]` in `[0,1]²`
    pub rect: [f32; 4],
}

impl Zone {
    pub fn new(direction: Direction, rect: [f32; 4]) -> Self {
        Self { direction, rect }
    }

    /// Half-open containment so adjacent zones never both claim a centroid.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let [x1, y1, x2, y2] = self.rect;
        let right_edge = x2 >= 1.0 && x == x2;
        let bottom_edge = y2 >= 1.0 && y == y2;
        (x >= x1 && (x < x2 || right_edge)) && (y >= y1 && (y < y2 || bottom_edge))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestSource {
    Gesture,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PedestrianRequest {
    pub direction: Direction,
    pub requested_at_ms: f64,
    pub source: RequestSource,
    pub served: bool,
}

impl PedestrianRequest {
    pub fn new(direction: Direction, requested_at_ms: f64, source: RequestSource) -> Self {
        Self {
            direction,
            requested_at_ms,
            source,
            served: false,
        }
    }
}
