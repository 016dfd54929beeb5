// src/config.rs
//
// Aggregate configuration. Every section defaults to a working setup, so a
// partial (or empty) YAML file is fine.

use crate::analysis::gesture_detector::GestureConfig;
use crate::analysis::vehicle_tracker::TrackerConfig;
use crate::control::controller::{ControllerConfig, SimpleConfig};
use crate::control::pedestrian::PedestrianConfig;
use crate::control::scheduler::{SchedulerConfig, TimeOfDayConfig};
use crate::error::ConfigError;
use crate::pipeline::event_log;
use crate::signal::actuator::ActuatorConfig;
use crate::signal::light_bank::ConflictGroups;
use crate::signal::light_fsm::TimingConfig;
use crate::types::{ControllerMode, Direction, Zone};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub decision_period_ms: u64,
    pub event_log_capacity: usize,
    pub initial_mode: ControllerMode,
    /// A detection source quiet for longer than this is treated as down
    pub detection_silence_ms: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decision_period_ms: 1000,
            event_log_capacity: event_log::DEFAULT_CAPACITY,
            initial_mode: ControllerMode::Auto,
            detection_silence_ms: 5000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` wins when set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub zones: Vec<Zone>,
    pub conflict_groups: Vec<Vec<Direction>>,
    pub timing: TimingConfig,
    pub scheduler: SchedulerConfig,
    pub time_of_day: TimeOfDayConfig,
    pub pedestrian: PedestrianConfig,
    pub gesture: GestureConfig,
    pub simple: SimpleConfig,
    pub actuator: ActuatorConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

/// Quadrant layout: North on top, South at the bottom, East/West split the
/// middle band.
pub fn default_zones() -> Vec<Zone> {
    vec![
        Zone::new(Direction::North, [0.0, 0.0, 1.0, 0.25]),
        Zone::new(Direction::East, [0.5, 0.25, 1.0, 0.75]),
        Zone::new(Direction::South, [0.0, 0.75, 1.0, 1.0]),
        Zone::new(Direction::West, [0.0, 0.25, 0.5, 0.75]),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            zones: default_zones(),
            conflict_groups: Direction::ALL.iter().map(|d| vec![*d]).collect(),
            timing: TimingConfig::default(),
            scheduler: SchedulerConfig::default(),
            time_of_day: TimeOfDayConfig::default(),
            pedestrian: PedestrianConfig::default(),
            gesture: GestureConfig::default(),
            simple: SimpleConfig::default(),
            actuator: ActuatorConfig::default(),
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("validating config {}", path.display()))?;
        Ok(config)
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            scheduler: self.scheduler.clone(),
            time_of_day: self.time_of_day.clone(),
            pedestrian: self.pedestrian.clone(),
            simple: self.simple.clone(),
        }
    }

    pub fn conflict_groups(&self) -> Result<ConflictGroups, ConfigError> {
        ConflictGroups::new(self.conflict_groups.clone())
    }

    /// Reject anything the engine could not run safely.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.conflict_groups()?;

        for zone in &self.zones {
            let [x1, y1, x2, y2] = zone.rect;
            let reason = if zone.rect.iter().any(|v| !v.is_finite()) {
                Some("non-finite coordinate")
            } else if zone.rect.iter().any(|v| !(0.0..=1.0).contains(v)) {
                Some("coordinates must lie in [0, 1]")
            } else if x2 <= x1 || y2 <= y1 {
                Some("empty rectangle")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(ConfigError::InvalidZone {
                    direction: zone.direction,
                    reason: reason.to_string(),
                });
            }
        }

        let s = &self.scheduler;
        if !(s.t_min_secs > 0.0) || s.t_min_secs > s.t_max_secs {
            return Err(ConfigError::InvalidTiming(format!(
                "need 0 < T_min <= T_max, got T_min={} T_max={}",
                s.t_min_secs, s.t_max_secs
            )));
        }
        if self.engine.decision_period_ms == 0 {
            return Err(ConfigError::InvalidTiming(
                "decision period must be positive".to_string(),
            ));
        }
        if !(self.engine.detection_silence_ms > 0.0) {
            return Err(ConfigError::InvalidTiming(format!(
                "detection silence limit must be positive, got {}",
                self.engine.detection_silence_ms
            )));
        }
        if self.timing.red_yellow_ms < 0.0 || self.timing.yellow_ms < 0.0 {
            return Err(ConfigError::InvalidTiming(
                "light dwell times must be non-negative".to_string(),
            ));
        }
        if self.actuator.initial_backoff_ms <= 0.0
            || self.actuator.max_backoff_ms < self.actuator.initial_backoff_ms
        {
            return Err(ConfigError::InvalidTiming(format!(
                "actuator backoff {}..{}ms",
                self.actuator.initial_backoff_ms, self.actuator.max_backoff_ms
            )));
        }

        let g = &self.gesture;
        if !(0.0..=1.0).contains(&g.min_confidence) || !(0.0..=1.0).contains(&g.min_area_ratio) {
            return Err(ConfigError::InvalidThreshold(
                "gesture confidence and area ratio must lie in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tracker.min_confidence) {
            return Err(ConfigError::InvalidThreshold(format!(
                "tracker min_confidence {}",
                self.tracker.min_confidence
            )));
        }
        if !(self.tracker.frame_width > 0.0 && self.tracker.frame_height > 0.0) {
            return Err(ConfigError::InvalidThreshold(
                "tracker frame size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
