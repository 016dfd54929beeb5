// src/analysis/gesture_detector.rs
//
// Pedestrian crossing request from a handheld camera.
// A pedestrian points their phone at the signal head; the request fires
// once the detection has been close, centred and steady long enough.
//
// Gates (all must pass in the same frame for it to qualify):
//   1. Presence   – target class above confidence threshold
//   2. Proximity  – bbox area / frame area above threshold
//   3. Alignment  – bbox centre near frame centre on both axes
//   4. Persistence – qualifying frames sustained for the minimum duration,
//                    tolerating a small gap of non-qualifying frames
//
// Cooldown is NOT enforced here; the pedestrian queue owns it.

use crate::types::{
    Detection, Direction, FrameGeometry, ObjectClass, PedestrianRequest, RequestSource,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

const HISTORY_FRAMES: usize = 60; // ~2s at 30fps

// ============================================================================
// CONFIGURATION
// ============================================================================

/// How the requested crossing direction is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GestureDirectionMode {
    /// Always the configured direction (one handheld source per crossing)
    #[default]
    Fixed,
    /// Frame quadrant of the detection centre
    Quadrant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    pub target_class: ObjectClass,
    pub min_confidence: f32,
    pub min_area_ratio: f32,
    /// Max |centre - frame centre| / frame extent, per axis
    pub center_tolerance: f32,
    pub min_duration_ms: f64,
    /// Consecutive non-qualifying frames tolerated inside a streak
    pub max_gap_frames: u32,
    pub direction_mode: GestureDirectionMode,
    pub direction: Direction,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            target_class: ObjectClass::TrafficLight,
            min_confidence: 0.4,
            min_area_ratio: 0.15,
            center_tolerance: 0.3,
            min_duration_ms: 2000.0,
            max_gap_frames: 1,
            direction_mode: GestureDirectionMode::Fixed,
            direction: Direction::North,
        }
    }
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GestureGate {
    Presence,
    Proximity,
    Alignment,
    Persistence,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GestureSession {
    direction: Direction,
    streak_frames: u32,
    started_ms: f64,
    last_qualifying_ms: f64,
    gap_frames: u32,
}

impl GestureSession {
    fn start(direction: Direction, timestamp_ms: f64) -> Self {
        Self {
            direction,
            streak_frames: 0,
            started_ms: timestamp_ms,
            last_qualifying_ms: timestamp_ms,
            gap_frames: 0,
        }
    }
}

/// Result of one gesture frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureUpdate {
    pub request: Option<PedestrianRequest>,
    /// Streak progress in `[0, 1]` for UI feedback
    pub progress: f32,
    /// First gate that did not pass this frame
    pub failed_gate: Option<GestureGate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GestureStatus {
    pub active: bool,
    pub progress: f32,
    pub streak_frames: u32,
    pub qualifying_rate: f32,
    pub requests_emitted: u64,
}

// ============================================================================
// DETECTOR
// ============================================================================

pub struct GestureDetector {
    config: GestureConfig,
    session: Option<GestureSession>,
    history: VecDeque<bool>,
    last_progress: f32,
    requests_emitted: u64,
    last_frame_ms: Option<f64>,
}

impl GestureDetector {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            session: None,
            history: VecDeque::with_capacity(HISTORY_FRAMES),
            last_progress: 0.0,
            requests_emitted: 0,
            last_frame_ms: None,
        }
    }

    pub fn update(
        &mut self,
        detection: Option<&Detection>,
        frame: FrameGeometry,
        timestamp_ms: f64,
    ) -> GestureUpdate {
        self.last_frame_ms = Some(timestamp_ms);
        let failed = self.first_failed_gate(detection, frame);
        self.push_history(failed.is_none());

        let det = match (failed, detection) {
            (None, Some(det)) => det,
            (gate, _) => {
                self.register_gap();
                self.last_progress = self.session_progress(timestamp_ms);
                return GestureUpdate {
                    request: None,
                    progress: self.last_progress,
                    failed_gate: gate.or(Some(GestureGate::Presence)),
                };
            }
        };

        let direction = self.resolve_direction(det, frame);
        let continuing = matches!(self.session, Some(s) if s.direction == direction);
        if !continuing {
            match self.session {
                Some(s) => debug!(
                    "👆 Gesture candidate changed {} → {}, restarting streak",
                    s.direction, direction
                ),
                None => debug!("👆 Gesture streak started for {}", direction),
            }
            self.session = Some(GestureSession::start(direction, timestamp_ms));
        }
        let session = self
            .session
            .get_or_insert_with(|| GestureSession::start(direction, timestamp_ms));
        session.gap_frames = 0;
        session.streak_frames += 1;
        session.last_qualifying_ms = timestamp_ms;

        let elapsed = timestamp_ms - session.started_ms;
        if elapsed >= self.config.min_duration_ms {
            info!(
                "🚶 Pedestrian gesture confirmed for {} ({:.1}s, {} frames)",
                direction,
                elapsed / 1000.0,
                session.streak_frames
            );
            self.session = None;
            self.last_progress = 1.0;
            self.requests_emitted += 1;
            return GestureUpdate {
                request: Some(PedestrianRequest::new(
                    direction,
                    timestamp_ms,
                    RequestSource::Gesture,
                )),
                progress: 1.0,
                failed_gate: None,
            };
        }

        self.last_progress = self.session_progress(timestamp_ms);
        GestureUpdate {
            request: None,
            progress: self.last_progress,
            failed_gate: Some(GestureGate::Persistence),
        }
    }

    fn first_failed_gate(
        &self,
        detection: Option<&Detection>,
        frame: FrameGeometry,
    ) -> Option<GestureGate> {
        let det = match detection {
            Some(d) if d.class == self.config.target_class => d,
            _ => return Some(GestureGate::Presence),
        };
        if det.confidence < self.config.min_confidence {
            return Some(GestureGate::Presence);
        }
        let bbox = match det.bbox.sanitized(frame) {
            Some(b) => b,
            None => return Some(GestureGate::Presence),
        };

        let frame_area = frame.area();
        if frame_area <= 0.0 || bbox.area() / frame_area < self.config.min_area_ratio {
            return Some(GestureGate::Proximity);
        }

        let (cx, cy) = bbox.center();
        let dev_x = (cx - frame.width * 0.5).abs() / frame.width;
        let dev_y = (cy - frame.height * 0.5).abs() / frame.height;
        let tol = self.config.center_tolerance;
        if dev_x >= tol || dev_y >= tol {
            return Some(GestureGate::Alignment);
        }

        None
    }

    fn register_gap(&mut self) {
        let max_gap = self.config.max_gap_frames;
        if let Some(session) = self.session.as_mut() {
            session.gap_frames += 1;
            if session.gap_frames > max_gap {
                debug!(
                    "✗ Gesture streak broken after {} frames",
                    session.streak_frames
                );
                self.session = None;
            }
        }
    }

    fn resolve_direction(&self, det: &Detection, frame: FrameGeometry) -> Direction {
        match self.config.direction_mode {
            GestureDirectionMode::Fixed => self.config.direction,
            GestureDirectionMode::Quadrant => {
                let (cx, cy) = det.bbox.center();
                let left = cx < frame.width * 0.5;
                let top = cy < frame.height * 0.5;
                match (left, top) {
                    (true, true) => Direction::North,
                    (false, true) => Direction::East,
                    (false, false) => Direction::South,
                    (true, false) => Direction::West,
                }
            }
        }
    }

    fn session_progress(&self, timestamp_ms: f64) -> f32 {
        match &self.session {
            Some(s) if self.config.min_duration_ms > 0.0 => {
                let elapsed = s.last_qualifying_ms.min(timestamp_ms) - s.started_ms;
                (elapsed / self.config.min_duration_ms).clamp(0.0, 1.0) as f32
            }
            _ => 0.0,
        }
    }

    fn push_history(&mut self, qualified: bool) {
        if self.history.len() >= HISTORY_FRAMES {
            self.history.pop_front();
        }
        self.history.push_back(qualified);
    }

    pub fn status(&self) -> GestureStatus {
        let qualifying = self.history.iter().filter(|q| **q).count();
        GestureStatus {
            active: self.session.is_some(),
            progress: self.last_progress,
            streak_frames: self.session.map(|s| s.streak_frames).unwrap_or(0),
            qualifying_rate: if self.history.is_empty() {
                0.0
            } else {
                qualifying as f32 / self.history.len() as f32
            },
            requests_emitted: self.requests_emitted,
        }
    }

    /// Timestamp of the last frame seen, if any
    pub fn last_frame_ms(&self) -> Option<f64> {
        self.last_frame_ms
    }

    pub fn reset(&mut self) {
        self.session = None;
        self.history.clear();
        self.last_progress = 0.0;
    }
}

// ============================================================================
// TESTS
// ============================================================================
