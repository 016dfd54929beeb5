// src/pipeline/mod.rs

pub mod event_log;
pub mod metrics;
pub mod status;

pub use event_log::{EventCategory, EventLog, EventLogEntry};
pub use metrics::{EngineMetrics, MetricsSummary};
pub use status::{DirectionStatus, StatusSnapshot};
