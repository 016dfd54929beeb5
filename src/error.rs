//! Error types for the signal engine

use crate::types::{ControllerMode, Direction};
use thiserror::Error;

/// Startup configuration that cannot be run safely. The only fatal class.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Direction {0} is not assigned to any conflict group")]
    UngroupedDirection(Direction),

    #[error("Direction {0} appears in more than one conflict group")]
    DuplicateGroupMember(Direction),

    #[error("Conflict group {0} is empty")]
    EmptyConflictGroup(usize),

    #[error("Invalid zone for {direction}: {reason}")]
    InvalidZone { direction: Direction, reason: String },

    #[error("Invalid timing: {0}")]
    InvalidTiming(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),
}

/// Rejected command. The engine state is unchanged when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Unknown direction: {0}")]
    UnknownDirection(String),

    #[error("Invalid light state: {0}")]
    InvalidState(String),

    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    #[error("Command requires {required} mode, engine is in {current}")]
    WrongMode {
        required: ControllerMode,
        current: ControllerMode,
    },

    #[error("Emergency mode is active; clear it first")]
    EmergencyActive,

    #[error("Pedestrian request for {direction} in cooldown ({remaining_ms:.0}ms remaining)")]
    Cooldown {
        direction: Direction,
        remaining_ms: f64,
    },

    #[error("{direction} cannot turn green while {blocking} is not red")]
    SafetyConflict {
        direction: Direction,
        blocking: Direction,
    },
}

impl CommandError {
    /// Stable machine-readable reason for external callers
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::UnknownDirection(_) => "UNKNOWN_DIRECTION",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::InvalidMode(_) => "INVALID_MODE",
            Self::WrongMode { .. } => "WRONG_MODE",
            Self::EmergencyActive => "EMERGENCY_ACTIVE",
            Self::Cooldown { .. } => "COOLDOWN",
            Self::SafetyConflict { .. } => "SAFETY_CONFLICT",
        }
    }
}

/// Refused activation that would put two conflict groups outside RED.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Activation of {requested} refused: conflicting {offending:?} not red")]
pub struct SafetyViolation {
    pub requested: Direction,
    pub offending: Vec<Direction>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuatorError {
    #[error("Actuator '{0}' unreachable")]
    Unreachable(String),

    #[error("Write to {direction} failed: {reason}")]
    WriteFailed { direction: Direction, reason: String },

    #[error("Actuator already released")]
    Released,
}

impl ActuatorError {
    /// Released actuators never come back; everything else is retried.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        assert_eq!(
            CommandError::UnknownDirection("UP".into()).reason_code(),
            "UNKNOWN_DIRECTION"
        );
        assert_eq!(CommandError::EmergencyActive.reason_code(), "EMERGENCY_ACTIVE");
        assert_eq!(
            CommandError::Cooldown {
                direction: Direction::East,
                remaining_ms: 100.0
            }
            .reason_code(),
            "COOLDOWN"
        );
    }

    #[test]
    fn test_actuator_error_recoverability() {
        assert!(ActuatorError::Unreachable("sim".into()).is_recoverable());
        assert!(!ActuatorError::Released.is_recoverable());
    }
}
