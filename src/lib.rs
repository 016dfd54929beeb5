// src/lib.rs
//
// Real-time traffic signal control engine.
//
//   detections → analysis::vehicle_tracker → counts ─┐
//   handheld   → analysis::gesture_detector ─────────┼→ control → signal → actuator
//   commands   → engine ─────────────────────────────┘

pub mod analysis;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod signal;
pub mod types;

pub use config::Config;
pub use engine::{CommandAck, Engine};
pub use error::{ActuatorError, CommandError, ConfigError, SafetyViolation};
