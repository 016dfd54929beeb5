// src/pipeline/event_log.rs
//
// Bounded, append-only record of everything the engine did.
// Oldest entries fall off the front once the ring is full.

use crate::types::Direction;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventCategory {
    System,
    Mode,
    Schedule,
    Transition,
    Pedestrian,
    Manual,
    Emergency,
    Safety,
    Actuator,
    Detection,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventLogEntry {
    pub seq: u64,
    pub timestamp_ms: f64,
    pub wall_time: DateTime<Utc>,
    pub category: EventCategory,
    pub direction: Option<Direction>,
    pub message: String,
}

/// An entry that has not been stamped yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub category: EventCategory,
    pub direction: Option<Direction>,
    pub message: String,
}

impl PendingEvent {
    pub fn new(category: EventCategory, direction: Option<Direction>, message: impl Into<String>) -> Self {
        Self {
            category,
            direction,
            message: message.into(),
        }
    }
}

pub struct EventLog {
    entries: VecDeque<EventLogEntry>,
    capacity: usize,
    next_seq: u64,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    pub fn record(
        &mut self,
        timestamp_ms: f64,
        category: EventCategory,
        direction: Option<Direction>,
        message: impl Into<String>,
    ) -> u64 {
        if self.entries.len() >= self.capacity {
            if let Some(dropped) = self.entries.pop_front() {
                debug!("Event log full, dropped #{}", dropped.seq);
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(EventLogEntry {
            seq,
            timestamp_ms,
            wall_time: Utc::now(),
            category,
            direction,
            message: message.into(),
        });
        seq
    }

    pub fn extend(&mut self, timestamp_ms: f64, events: impl IntoIterator<Item = PendingEvent>) {
        for e in events {
            self.record(timestamp_ms, e.category, e.direction, e.message);
        }
    }

    /// Newest `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<EventLogEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ever recorded, including the ones already dropped.
    pub fn total_recorded(&self) -> u64 {
        self.next_seq
    }
}
