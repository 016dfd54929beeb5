// src/pipeline/status.rs
//
// Pull-based status snapshot. Assembled from owned copies, never holds a
// lock once built.

use super::metrics::MetricsSummary;
use crate::analysis::gesture_detector::GestureStatus;
use crate::signal::light_bank::ActuatorHealth;
use crate::types::{ControllerMode, Direction, LightState};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DirectionStatus {
    pub direction: Direction,
    pub state: LightState,
    pub count: usize,
    pub waiting_cycles: u32,
    /// Green time the scheduler would grant now, seconds
    pub green_budget_secs: f64,
    pub priority: f64,
    pub starved: bool,
    pub pedestrian_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_target: Option<LightState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub mode: ControllerMode,
    pub directions: Vec<DirectionStatus>,
    pub active_direction: Option<Direction>,
    pub peak_hours: bool,
    pub night_mode: bool,
    pub cycle_count: u64,
    pub pedestrian_requests_served: u64,
    pub stats: MetricsSummary,
    pub actuator: ActuatorHealth,
    /// All activations suppressed until the emergency is cleared
    pub emergency_latched: bool,
    /// Conflict groups with a non-RED head; never above one
    pub active_conflict_groups: usize,
    /// Vehicle camera silent past the configured limit; counts read as zero
    pub detection_stale: bool,
    pub gesture: GestureStatus,
    pub engine_time_ms: f64,
    pub timestamp: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn direction(&self, dir: Direction) -> Option<&DirectionStatus> {
        self.directions.iter().find(|d| d.direction == dir)
    }

    pub fn state(&self, dir: Direction) -> Option<LightState> {
        self.direction(dir).map(|d| d.state)
    }

    pub fn all_red(&self) -> bool {
        self.directions.iter().all(|d| d.state.is_red())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
