// src/control/pedestrian.rs
//
// Pending crossing requests, one per direction, plus the per-direction
// cooldown that starts when a request is served.

use crate::error::CommandError;
use crate::types::{Direction, DirectionMap, PedestrianRequest, RequestSource};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PedestrianConfig {
    /// Green the active vehicle direction keeps before a crossing preempts it
    pub min_vehicle_dwell_ms: f64,
    pub green_ms: f64,
    pub cooldown_ms: f64,
}

impl Default for PedestrianConfig {
    fn default() -> Self {
        Self {
            min_vehicle_dwell_ms: 5000.0,
            green_ms: 15_000.0,
            cooldown_ms: 30_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Folded into the request already waiting for this direction
    AlreadyPending,
}

pub struct PedestrianQueue {
    pending: Vec<PedestrianRequest>,
    last_served_ms: DirectionMap<Option<f64>>,
    cooldown_ms: f64,
    total_served: u64,
}

impl PedestrianQueue {
    pub fn new(cooldown_ms: f64) -> Self {
        Self {
            pending: Vec::new(),
            last_served_ms: DirectionMap::filled(None),
            cooldown_ms,
            total_served: 0,
        }
    }

    /// Remaining cooldown for `dir` at `now_ms`, zero when free.
    pub fn cooldown_remaining(&self, dir: Direction, now_ms: f64) -> f64 {
        match self.last_served_ms[dir] {
            Some(served) => (self.cooldown_ms - (now_ms - served)).max(0.0),
            None => 0.0,
        }
    }

    pub fn submit(
        &mut self,
        direction: Direction,
        now_ms: f64,
        source: RequestSource,
    ) -> Result<SubmitOutcome, CommandError> {
        let remaining = self.cooldown_remaining(direction, now_ms);
        if remaining > 0.0 {
            debug!(
                "🚶 {} request from {:?} ignored, cooldown {:.0}ms",
                direction, source, remaining
            );
            return Err(CommandError::Cooldown {
                direction,
                remaining_ms: remaining,
            });
        }
        if self.is_pending(direction) {
            return Ok(SubmitOutcome::AlreadyPending);
        }
        info!("🚶 Pedestrian request queued for {} ({:?})", direction, source);
        self.pending
            .push(PedestrianRequest::new(direction, now_ms, source));
        Ok(SubmitOutcome::Queued)
    }

    pub fn is_pending(&self, dir: Direction) -> bool {
        self.pending.iter().any(|r| r.direction == dir)
    }

    /// Owned copy, oldest first.
    pub fn snapshot(&self) -> Vec<PedestrianRequest> {
        let mut out = self.pending.clone();
        out.sort_by(|a, b| a.requested_at_ms.total_cmp(&b.requested_at_ms));
        out
    }

    pub fn pending_map(&self) -> DirectionMap<bool> {
        DirectionMap::from_fn(|d| self.is_pending(d))
    }

    /// Drop the request for `dir` and start its cooldown.
    pub fn mark_served(&mut self, dir: Direction, now_ms: f64) -> Option<PedestrianRequest> {
        let idx = self.pending.iter().position(|r| r.direction == dir)?;
        let mut request = self.pending.remove(idx);
        request.served = true;
        self.last_served_ms[dir] = Some(now_ms);
        self.total_served += 1;
        Some(request)
    }

    pub fn total_served(&self) -> u64 {
        self.total_served
    }
}
