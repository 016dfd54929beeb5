// src/signal/actuator.rs
//
// Physical output boundary. One addressable output per direction; the
// engine never assumes a segment layout behind it.

use crate::error::ActuatorError;
use crate::types::{ActuatorOutput, Direction, DirectionMap};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::info;

/// Sink for per-direction light outputs.
///
/// Implementations are only ever driven from inside the light bank, which
/// serializes every call.
pub trait ActuatorSink: Send {
    fn name(&self) -> &str;

    fn write(&mut self, direction: Direction, output: ActuatorOutput) -> Result<(), ActuatorError>;

    /// Hand the hardware back. Called once, after every direction is dark.
    fn release(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub initial_backoff_ms: f64,
    pub max_backoff_ms: f64,
    /// Consecutive failures before the degradation becomes a persistent warning
    pub retry_budget: u32,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500.0,
            max_backoff_ms: 30_000.0,
            retry_budget: 5,
        }
    }
}

// ============================================================================
// LOGGING ACTUATOR
// ============================================================================

/// Traces every write. Stand-in for hardware on a dev box.
pub struct LoggingActuator {
    name: String,
    writes: u64,
}

impl LoggingActuator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            writes: 0,
        }
    }
}

impl ActuatorSink for LoggingActuator {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, direction: Direction, output: ActuatorOutput) -> Result<(), ActuatorError> {
        self.writes += 1;
        info!("💡 [{}] #{} {} ← {:?}", self.name, self.writes, direction, output);
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        info!("💡 [{}] released after {} writes", self.name, self.writes);
        Ok(())
    }
}

// ============================================================================
// SIMULATED ACTUATOR
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteRecord {
    pub seq: u64,
    pub direction: Direction,
    pub output: ActuatorOutput,
}

/// In-memory actuator. Writes are shipped over a channel to a
/// [`SimulatedActuatorHandle`] so tests can inspect them after the
/// actuator has been moved into the engine.
pub struct SimulatedActuator {
    tx: Sender<WriteRecord>,
    failing: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
    seq: u64,
}

pub struct SimulatedActuatorHandle {
    rx: Receiver<WriteRecord>,
    log: Vec<WriteRecord>,
    failing: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
}

impl SimulatedActuator {
    pub fn new() -> (Self, SimulatedActuatorHandle) {
        let (tx, rx) = mpsc::channel();
        let failing = Arc::new(AtomicBool::new(false));
        let released = Arc::new(AtomicBool::new(false));
        (
            Self {
                tx,
                failing: failing.clone(),
                released: released.clone(),
                seq: 0,
            },
            SimulatedActuatorHandle {
                rx,
                log: Vec::new(),
                failing,
                released,
            },
        )
    }
}

impl ActuatorSink for SimulatedActuator {
    fn name(&self) -> &str {
        "simulated"
    }

    fn write(&mut self, direction: Direction, output: ActuatorOutput) -> Result<(), ActuatorError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(ActuatorError::Released);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ActuatorError::Unreachable(self.name().to_string()));
        }
        let seq = self.seq;
        self.seq += 1;
        // A dropped handle just means nobody is watching
        let _ = self.tx.send(WriteRecord {
            seq,
            direction,
            output,
        });
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl SimulatedActuatorHandle {
    /// Make subsequent writes fail with `Unreachable`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn writes(&mut self) -> &[WriteRecord] {
        self.log.extend(self.rx.try_iter());
        &self.log
    }

    /// Last output written per direction (`Off` if never written)
    pub fn outputs(&mut self) -> DirectionMap<ActuatorOutput> {
        let mut outputs = DirectionMap::filled(ActuatorOutput::Off);
        for w in self.writes() {
            outputs[w.direction] = w.output;
        }
        outputs
    }
}
