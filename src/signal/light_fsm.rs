// src/signal/light_fsm.rs
//
// Per-direction signal head state machine.
//
//   activation:    RED → RED_YELLOW (dwell) → GREEN
//   deactivation:  GREEN → YELLOW (dwell) → RED
//
// Extra edges: any state may be forced to RED (fail-safe), and YELLOW may
// be recalled to GREEN (simple-mode "vehicle came back" cancel).
// Cross-direction safety is NOT checked here; the bank owns that.

use crate::types::{Direction, LightState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub red_yellow_ms: f64,
    pub yellow_ms: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            red_yellow_ms: 1000.0,
            yellow_ms: 2000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransitionKind {
    /// RED → RED_YELLOW
    Activate,
    /// RED_YELLOW → GREEN
    Engage,
    /// GREEN → YELLOW
    Degrade,
    /// YELLOW → RED
    Clear,
    /// YELLOW → GREEN
    Recall,
    /// anything → RED
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub direction: Direction,
    pub from: LightState,
    pub to: LightState,
    pub kind: TransitionKind,
    pub at_ms: f64,
}

#[derive(Debug, Clone)]
pub struct LightFsm {
    direction: Direction,
    state: LightState,
    entered_ms: f64,
    /// Deactivation requested while still in RED_YELLOW
    deactivate_pending: bool,
}

impl LightFsm {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: LightState::Red,
            entered_ms: 0.0,
            deactivate_pending: false,
        }
    }

    pub fn state(&self) -> LightState {
        self.state
    }

    pub fn entered_ms(&self) -> f64 {
        self.entered_ms
    }

    pub fn time_in_state(&self, now_ms: f64) -> f64 {
        (now_ms - self.entered_ms).max(0.0)
    }

    pub fn deactivate_pending(&self) -> bool {
        self.deactivate_pending
    }

    fn enter(&mut self, to: LightState, kind: TransitionKind, now_ms: f64) -> TransitionRecord {
        let record = TransitionRecord {
            direction: self.direction,
            from: self.state,
            to,
            kind,
            at_ms: now_ms,
        };
        self.state = to;
        self.entered_ms = now_ms;
        record
    }

    /// RED → RED_YELLOW. No-op from any other state.
    pub fn begin_activation(&mut self, now_ms: f64) -> Option<TransitionRecord> {
        match self.state {
            LightState::Red => {
                self.deactivate_pending = false;
                Some(self.enter(LightState::RedYellow, TransitionKind::Activate, now_ms))
            }
            LightState::RedYellow => {
                self.deactivate_pending = false;
                None
            }
            _ => None,
        }
    }

    /// GREEN → YELLOW. From RED_YELLOW the request is remembered and runs
    /// once GREEN is reached.
    pub fn begin_deactivation(&mut self, now_ms: f64) -> Option<TransitionRecord> {
        match self.state {
            LightState::Green => {
                self.deactivate_pending = false;
                Some(self.enter(LightState::Yellow, TransitionKind::Degrade, now_ms))
            }
            LightState::RedYellow => {
                self.deactivate_pending = true;
                None
            }
            LightState::Yellow | LightState::Red => None,
        }
    }

    /// YELLOW → GREEN, cancelling a degrade in progress.
    pub fn recall(&mut self, now_ms: f64) -> Option<TransitionRecord> {
        match self.state {
            LightState::Yellow => {
                self.deactivate_pending = false;
                Some(self.enter(LightState::Green, TransitionKind::Recall, now_ms))
            }
            _ => None,
        }
    }

    /// Run the dwell-driven edges whose time has come. At most one per call.
    pub fn advance(&mut self, now_ms: f64, timing: &TimingConfig) -> Option<TransitionRecord> {
        match self.state {
            LightState::RedYellow if self.time_in_state(now_ms) >= timing.red_yellow_ms => {
                Some(self.enter(LightState::Green, TransitionKind::Engage, now_ms))
            }
            LightState::Green if self.deactivate_pending => {
                self.deactivate_pending = false;
                Some(self.enter(LightState::Yellow, TransitionKind::Degrade, now_ms))
            }
            LightState::Yellow if self.time_in_state(now_ms) >= timing.yellow_ms => {
                Some(self.enter(LightState::Red, TransitionKind::Clear, now_ms))
            }
            _ => None,
        }
    }

    /// Fail-safe: straight to RED.
    pub fn force_red(&mut self, now_ms: f64) -> Option<TransitionRecord> {
        self.deactivate_pending = false;
        if self.state.is_red() {
            return None;
        }
        Some(self.enter(LightState::Red, TransitionKind::Force, now_ms))
    }
}
