// src/signal/light_bank.rs
//
// All signal heads of the intersection plus the actuator they drive.
// The only writer of physical state.
//
// Invariant: at most one conflict group is outside RED at any instant.
// An activation that would break it is refused, reported, and the
// offending directions are forced RED.
//
// Every transition is written while the caller holds the bank (one lock),
// so writes are serialized across directions and readers of the light
// state never see a half-applied transition.

use super::actuator::{ActuatorConfig, ActuatorSink};
use super::light_fsm::{LightFsm, TimingConfig, TransitionRecord};
use crate::error::{ActuatorError, ConfigError, SafetyViolation};
use crate::types::{ActuatorOutput, Direction, DirectionMap, LightState};
use serde::Serialize;
use tracing::{debug, error, info, warn};

// ============================================================================
// CONFLICT GROUPS
// ============================================================================

/// Partition of the directions. Same group = may be non-RED together.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictGroups {
    groups: Vec<Vec<Direction>>,
    group_of: DirectionMap<usize>,
}

impl ConflictGroups {
    /// Rejects any table under which the invariant could not be satisfied.
    pub fn new(groups: Vec<Vec<Direction>>) -> Result<Self, ConfigError> {
        let mut group_of: DirectionMap<Option<usize>> = DirectionMap::filled(None);
        for (gi, group) in groups.iter().enumerate() {
            if group.is_empty() {
                return Err(ConfigError::EmptyConflictGroup(gi));
            }
            for &dir in group {
                if group_of[dir].is_some() {
                    return Err(ConfigError::DuplicateGroupMember(dir));
                }
                group_of[dir] = Some(gi);
            }
        }
        for (dir, slot) in group_of.iter() {
            if slot.is_none() {
                return Err(ConfigError::UngroupedDirection(dir));
            }
        }
        Ok(Self {
            group_of: DirectionMap::from_fn(|d| group_of[d].unwrap_or_default()),
            groups,
        })
    }

    /// Every direction conflicts with every other
    pub fn exclusive() -> Self {
        Self {
            groups: Direction::ALL.iter().map(|d| vec![*d]).collect(),
            group_of: DirectionMap::from_fn(|d| d.index()),
        }
    }

    pub fn conflicts(&self, a: Direction, b: Direction) -> bool {
        self.group_of[a] != self.group_of[b]
    }

    pub fn group_of(&self, dir: Direction) -> usize {
        self.group_of[dir]
    }

    pub fn groups(&self) -> &[Vec<Direction>] {
        &self.groups
    }
}

// ============================================================================
// ACTUATOR HEALTH
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActuatorHealth {
    pub degraded: bool,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub backoff_ms: f64,
    pub next_retry_ms: f64,
    pub budget_exceeded: bool,
    pub released: bool,
}

impl ActuatorHealth {
    fn healthy(initial_backoff_ms: f64) -> Self {
        Self {
            degraded: false,
            consecutive_failures: 0,
            total_failures: 0,
            backoff_ms: initial_backoff_ms,
            next_retry_ms: 0.0,
            budget_exceeded: false,
            released: false,
        }
    }
}

/// Owned per-direction read of the bank, handed to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LightView {
    pub state: LightState,
    pub entered_ms: f64,
}

/// Things the bank did that the engine must log or count
#[derive(Debug, Clone, PartialEq)]
pub enum BankNotice {
    Transition(TransitionRecord),
    SafetyViolation(SafetyViolation),
    ActivationSuppressed(Direction),
    ActuatorDegraded(ActuatorError),
    ActuatorRetryBudgetExceeded { failures: u32 },
    ActuatorRecovered { after_failures: u32 },
}

// ============================================================================
// BANK
// ============================================================================

pub struct LightBank {
    fsms: DirectionMap<LightFsm>,
    groups: ConflictGroups,
    timing: TimingConfig,
    backoff: ActuatorConfig,
    actuator: Box<dyn ActuatorSink>,
    health: ActuatorHealth,
    emergency_latched: bool,
    notices: Vec<BankNotice>,
}

impl LightBank {
    pub fn new(
        groups: ConflictGroups,
        timing: TimingConfig,
        backoff: ActuatorConfig,
        actuator: Box<dyn ActuatorSink>,
        now_ms: f64,
    ) -> Self {
        let health = ActuatorHealth::healthy(backoff.initial_backoff_ms);
        let mut bank = Self {
            fsms: DirectionMap::from_fn(LightFsm::new),
            groups,
            timing,
            backoff,
            actuator,
            health,
            emergency_latched: false,
            notices: Vec::new(),
        };
        info!(
            "🚦 Light bank ready on actuator '{}' ({} conflict groups)",
            bank.actuator.name(),
            bank.groups.groups().len()
        );
        bank.sync_all(now_ms);
        bank
    }

    // ────────────────────────────────────────────────────────────────────
    // Reads
    // ────────────────────────────────────────────────────────────────────

    pub fn state(&self, dir: Direction) -> LightState {
        self.fsms[dir].state()
    }

    pub fn states(&self) -> DirectionMap<LightState> {
        DirectionMap::from_fn(|d| self.fsms[d].state())
    }

    pub fn views(&self) -> DirectionMap<LightView> {
        DirectionMap::from_fn(|d| LightView {
            state: self.fsms[d].state(),
            entered_ms: self.fsms[d].entered_ms(),
        })
    }

    pub fn all_red(&self) -> bool {
        Direction::ALL.iter().all(|d| self.fsms[*d].state().is_red())
    }

    /// Directions outside `dir`'s group that are not RED
    pub fn blocking(&self, dir: Direction) -> Vec<Direction> {
        Direction::ALL
            .iter()
            .copied()
            .filter(|other| self.groups.conflicts(dir, *other))
            .filter(|other| !self.fsms[*other].state().is_red())
            .collect()
    }

    pub fn conflicts_clear(&self, dir: Direction) -> bool {
        self.blocking(dir).is_empty()
    }

    /// Number of conflict groups with at least one non-RED head.
    pub fn active_groups(&self) -> usize {
        let mut seen: Vec<usize> = Direction::ALL
            .iter()
            .filter(|d| !self.fsms[**d].state().is_red())
            .map(|d| self.groups.group_of(*d))
            .collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }

    pub fn health(&self) -> ActuatorHealth {
        self.health
    }

    pub fn is_latched(&self) -> bool {
        self.emergency_latched
    }

    pub fn take_notices(&mut self) -> Vec<BankNotice> {
        std::mem::take(&mut self.notices)
    }

    // ────────────────────────────────────────────────────────────────────
    // Transitions
    // ────────────────────────────────────────────────────────────────────

    /// Advance dwell-driven edges and retry a degraded actuator if due.
    pub fn tick(&mut self, now_ms: f64) {
        self.retry_actuator(now_ms);
        for dir in Direction::ALL {
            if let Some(record) = self.fsms[dir].advance(now_ms, &self.timing) {
                self.apply(record);
            }
        }
    }

    /// Begin RED → RED_YELLOW for `dir`.
    ///
    /// Refused (and the blockers forced RED) when a conflicting direction is
    /// not RED; suppressed while the emergency latch is set.
    pub fn activate(
        &mut self,
        dir: Direction,
        now_ms: f64,
    ) -> Result<Option<TransitionRecord>, SafetyViolation> {
        if self.emergency_latched {
            debug!("⛔ Activation of {} suppressed by emergency latch", dir);
            self.notices.push(BankNotice::ActivationSuppressed(dir));
            return Ok(None);
        }

        let offending = self.blocking(dir);
        if !offending.is_empty() {
            let violation = SafetyViolation {
                requested: dir,
                offending: offending.clone(),
            };
            error!("🚨 SAFETY: {}, forcing {:?} to RED", violation, offending);
            self.notices.push(BankNotice::SafetyViolation(violation.clone()));
            for other in offending {
                if let Some(record) = self.fsms[other].force_red(now_ms) {
                    self.apply(record);
                }
            }
            return Err(violation);
        }

        let record = self.fsms[dir].begin_activation(now_ms);
        if let Some(r) = record {
            self.apply(r);
        }
        Ok(record)
    }

    /// Begin GREEN → YELLOW for `dir` (deferred if still RED_YELLOW).
    pub fn deactivate(&mut self, dir: Direction, now_ms: f64) -> Option<TransitionRecord> {
        let record = self.fsms[dir].begin_deactivation(now_ms);
        if let Some(r) = record {
            self.apply(r);
        }
        record
    }

    /// YELLOW → GREEN. The head is already non-RED, so the invariant is
    /// unaffected; still refused under the emergency latch.
    pub fn recall(&mut self, dir: Direction, now_ms: f64) -> Option<TransitionRecord> {
        if self.emergency_latched {
            return None;
        }
        let record = self.fsms[dir].recall(now_ms);
        if let Some(r) = record {
            self.apply(r);
        }
        record
    }

    /// Fail-safe: every head to RED immediately. With `latch`, further
    /// activations are suppressed until [`LightBank::unlatch`].
    pub fn force_all_red(&mut self, now_ms: f64, latch: bool) -> Vec<TransitionRecord> {
        if latch && !self.emergency_latched {
            warn!("🛑 Emergency latch set, all directions forced RED");
            self.emergency_latched = true;
        }
        let mut records = Vec::new();
        for dir in Direction::ALL {
            if let Some(record) = self.fsms[dir].force_red(now_ms) {
                self.apply(record);
                records.push(record);
            }
        }
        records
    }

    pub fn unlatch(&mut self) {
        if self.emergency_latched {
            info!("✅ Emergency latch cleared");
            self.emergency_latched = false;
        }
    }

    /// Darken every output and hand the actuator back. Caller drains to
    /// RED first.
    pub fn release(&mut self) -> Result<(), ActuatorError> {
        if self.health.released {
            return Ok(());
        }
        if !self.all_red() {
            warn!("⚠️  Releasing actuator with non-RED heads: {:?}", self.states());
        }
        for dir in Direction::ALL {
            if let Err(e) = self.actuator.write(dir, ActuatorOutput::Off) {
                warn!("⚠️  Could not darken {}: {}", dir, e);
            }
        }
        self.actuator.release()?;
        self.health.released = true;
        info!("🔌 Actuator '{}' released", self.actuator.name());
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────
    // Actuator plumbing
    // ────────────────────────────────────────────────────────────────────

    fn apply(&mut self, record: TransitionRecord) {
        info!(
            "🚦 {} {} → {} ({:?})",
            record.direction, record.from, record.to, record.kind
        );
        self.notices.push(BankNotice::Transition(record));
        if self.health.degraded || self.health.released {
            // Logical state moves on; the next successful retry resyncs it
            return;
        }
        if let Err(e) = self.actuator.write(record.direction, record.to.output()) {
            self.register_failure(e, record.at_ms);
        }
    }

    /// Write every head's current state.
    fn sync_all(&mut self, now_ms: f64) -> bool {
        for dir in Direction::ALL {
            let output = self.fsms[dir].state().output();
            if let Err(e) = self.actuator.write(dir, output) {
                self.register_failure(e, now_ms);
                return false;
            }
        }
        true
    }

    fn register_failure(&mut self, err: ActuatorError, now_ms: f64) {
        let h = &mut self.health;
        h.consecutive_failures += 1;
        h.total_failures += 1;
        if !err.is_recoverable() {
            h.degraded = true;
            h.backoff_ms = self.backoff.max_backoff_ms;
        } else if h.degraded {
            h.backoff_ms = (h.backoff_ms * 2.0).min(self.backoff.max_backoff_ms);
        } else {
            h.degraded = true;
            h.backoff_ms = self.backoff.initial_backoff_ms;
        }
        h.next_retry_ms = now_ms + h.backoff_ms;
        warn!(
            "⚠️  Actuator degraded ({}), retry in {:.0}ms [failure {}]",
            err, h.backoff_ms, h.consecutive_failures
        );
        self.notices.push(BankNotice::ActuatorDegraded(err));

        if !h.budget_exceeded && h.consecutive_failures > self.backoff.retry_budget {
            h.budget_exceeded = true;
            error!(
                "🚨 Actuator still unreachable after {} attempts, running on last-known state",
                h.consecutive_failures
            );
            self.notices.push(BankNotice::ActuatorRetryBudgetExceeded {
                failures: h.consecutive_failures,
            });
        }
    }

    fn retry_actuator(&mut self, now_ms: f64) {
        if !self.health.degraded || self.health.released || now_ms < self.health.next_retry_ms {
            return;
        }
        debug!("🔁 Retrying actuator '{}'", self.actuator.name());
        if self.sync_all(now_ms) {
            let after = self.health.consecutive_failures;
            info!("✅ Actuator recovered after {} failures", after);
            self.health.degraded = false;
            self.health.consecutive_failures = 0;
            self.health.budget_exceeded = false;
            self.health.backoff_ms = self.backoff.initial_backoff_ms;
            self.notices.push(BankNotice::ActuatorRecovered {
                after_failures: after,
            });
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
