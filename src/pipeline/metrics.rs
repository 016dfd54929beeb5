// src/pipeline/metrics.rs
//
// Engine counters. Lock-free so any producer can bump them without
// touching the structure locks.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct EngineMetrics {
    pub vehicle_frames: Arc<AtomicU64>,
    pub gesture_frames: Arc<AtomicU64>,
    pub tracks_created: Arc<AtomicU64>,
    pub decisions: Arc<AtomicU64>,
    pub transitions: Arc<AtomicU64>,
    pub pedestrian_requests: Arc<AtomicU64>,
    pub pedestrian_served: Arc<AtomicU64>,
    pub safety_violations: Arc<AtomicU64>,
    pub actuator_failures: Arc<AtomicU64>,
    pub emergency_stops: Arc<AtomicU64>,
    pub commands_rejected: Arc<AtomicU64>,
    pub decision_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            vehicle_frames: Arc::new(AtomicU64::new(0)),
            gesture_frames: Arc::new(AtomicU64::new(0)),
            tracks_created: Arc::new(AtomicU64::new(0)),
            decisions: Arc::new(AtomicU64::new(0)),
            transitions: Arc::new(AtomicU64::new(0)),
            pedestrian_requests: Arc::new(AtomicU64::new(0)),
            pedestrian_served: Arc::new(AtomicU64::new(0)),
            safety_violations: Arc::new(AtomicU64::new(0)),
            actuator_failures: Arc::new(AtomicU64::new(0)),
            emergency_stops: Arc::new(AtomicU64::new(0)),
            commands_rejected: Arc::new(AtomicU64::new(0)),
            decision_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(&self, counter: &AtomicU64, value: u64) {
        counter.store(value, Ordering::Relaxed);
    }

    pub fn get(&self, counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn fps(&self) -> f64 {
        let frames = self.vehicle_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            vehicle_frames: self.get(&self.vehicle_frames),
            gesture_frames: self.get(&self.gesture_frames),
            fps: self.fps(),
            tracks_created: self.get(&self.tracks_created),
            decisions: self.get(&self.decisions),
            transitions: self.get(&self.transitions),
            pedestrian_requests: self.get(&self.pedestrian_requests),
            pedestrian_served: self.get(&self.pedestrian_served),
            safety_violations: self.get(&self.safety_violations),
            actuator_failures: self.get(&self.actuator_failures),
            emergency_stops: self.get(&self.emergency_stops),
            commands_rejected: self.get(&self.commands_rejected),
            last_decision_us: self.get(&self.decision_time_us),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub vehicle_frames: u64,
    pub gesture_frames: u64,
    pub fps: f64,
    pub tracks_created: u64,
    pub decisions: u64,
    pub transitions: u64,
    pub pedestrian_requests: u64,
    pub pedestrian_served: u64,
    pub safety_violations: u64,
    pub actuator_failures: u64,
    pub emergency_stops: u64,
    pub commands_rejected: u64,
    pub last_decision_us: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = EngineMetrics::new();
        let handle = metrics.clone();
        handle.inc(&handle.safety_violations);
        for _ in 0..3 {
            metrics.inc(&metrics.transitions);
        }
        let summary = metrics.summary();
        assert_eq!(summary.safety_violations, 1);
        assert_eq!(summary.transitions, 3);
    }
}
