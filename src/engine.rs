// src/engine.rs
//
// The single context object. Owns every shared structure behind its own
// lock and exposes the producer entry points, the command surface, the
// status snapshot and the decision loop.
//
// Lock discipline: each structure has one parking_lot::Mutex and no code
// path holds two of them at once. Data moves between them as owned
// snapshots (counts, light views, pending crossings).
//
// Per decision cycle:
//   emergency flag → lights.tick → counts (zero when stale) → crossings
//     → controller.decide → crossings.mark_served → lights.apply → event log
//
// Emergency mode and its flag only change together under the controller
// lock; the bank latch follows the flag under the bank lock.

use crate::analysis::gesture_detector::{GestureDetector, GestureUpdate};
use crate::analysis::vehicle_tracker::{CountSnapshot, VehicleTracker};
use crate::config::Config;
use crate::control::controller::{Controller, CycleInput, LightCommand};
use crate::control::pedestrian::{PedestrianQueue, SubmitOutcome};
use crate::error::{ActuatorError, CommandError, ConfigError};
use crate::pipeline::event_log::{EventCategory, EventLog, EventLogEntry, PendingEvent};
use crate::pipeline::metrics::EngineMetrics;
use crate::pipeline::status::{DirectionStatus, StatusSnapshot};
use crate::signal::actuator::ActuatorSink;
use crate::signal::light_bank::{BankNotice, LightBank};
use crate::types::{
    ControllerMode, Detection, Direction, DirectionCounts, FrameGeometry, LightState,
    RequestSource,
};
use chrono::{Local, NaiveTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Positive reply to a command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandAck {
    pub command: &'static str,
    pub message: String,
    pub at_ms: f64,
}

pub struct Engine {
    config: Config,
    tracker: Mutex<VehicleTracker>,
    counts: Mutex<CountSnapshot>,
    gesture: Mutex<GestureDetector>,
    pedestrians: Mutex<PedestrianQueue>,
    lights: Mutex<LightBank>,
    controller: Mutex<Controller>,
    events: Mutex<EventLog>,
    emergency: AtomicBool,
    shutting_down: AtomicBool,
    /// Vehicle camera silent past `detection_silence_ms`
    detection_stale: AtomicBool,
    /// Latest engine time seen, as `f64` bits
    clock_ms: AtomicU64,
    started: Instant,
    metrics: EngineMetrics,
}

impl Engine {
    pub fn new(config: Config, actuator: Box<dyn ActuatorSink>) -> Result<Self, ConfigError> {
        config.validate()?;
        let groups = config.conflict_groups()?;

        let bank = LightBank::new(
            groups.clone(),
            config.timing.clone(),
            config.actuator.clone(),
            actuator,
            0.0,
        );
        let initial_mode = config.engine.initial_mode;
        let controller = Controller::new(config.controller(), groups, initial_mode);

        let engine = Self {
            tracker: Mutex::new(VehicleTracker::new(
                config.tracker.clone(),
                config.zones.clone(),
            )),
            counts: Mutex::new(CountSnapshot::empty()),
            gesture: Mutex::new(GestureDetector::new(config.gesture.clone())),
            pedestrians: Mutex::new(PedestrianQueue::new(config.pedestrian.cooldown_ms)),
            lights: Mutex::new(bank),
            controller: Mutex::new(controller),
            events: Mutex::new(EventLog::new(config.engine.event_log_capacity)),
            emergency: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            detection_stale: AtomicBool::new(false),
            clock_ms: AtomicU64::new(0.0f64.to_bits()),
            started: Instant::now(),
            metrics: EngineMetrics::new(),
            config,
        };

        let notices = engine.lights.lock().take_notices();
        engine.absorb_notices(0.0, notices);
        engine.log(
            EventCategory::System,
            None,
            format!("Engine started in {} mode", initial_mode),
        );
        if initial_mode == ControllerMode::Emergency {
            engine.emergency.store(true, Ordering::SeqCst);
            engine.lights.lock().force_all_red(0.0, true);
        }
        info!("🚦 Engine ready ({} mode)", initial_mode);
        Ok(engine)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Milliseconds since construction; the time base of [`Engine::run`].
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Latest engine time observed by a step or a producer.
    pub fn now_ms(&self) -> f64 {
        f64::from_bits(self.clock_ms.load(Ordering::SeqCst))
    }

    fn advance_clock(&self, now_ms: f64) {
        if now_ms.is_finite() {
            // Non-negative f64 bit patterns order like the values
            self.clock_ms
                .fetch_max(now_ms.max(0.0).to_bits(), Ordering::SeqCst);
        }
    }

    fn log(&self, category: EventCategory, direction: Option<Direction>, message: String) {
        let now = self.now_ms();
        self.events.lock().record(now, category, direction, message);
    }

    fn reject(&self, command: &str, err: CommandError) -> CommandError {
        self.metrics.inc(&self.metrics.commands_rejected);
        warn!("⛔ {} rejected: {} [{}]", command, err, err.reason_code());
        err
    }

    fn ack(&self, command: &'static str, message: String) -> CommandAck {
        CommandAck {
            command,
            message,
            at_ms: self.now_ms(),
        }
    }

    // ========================================================================
    // PRODUCERS
    // ========================================================================

    /// Feed one vehicle-camera frame. The new counts are published whole.
    pub fn ingest_vehicle_frame(
        &self,
        detections: &[Detection],
        timestamp_ms: f64,
        frame_id: u64,
    ) -> CountSnapshot {
        self.advance_clock(timestamp_ms);
        let (snapshot, created) = {
            let mut tracker = self.tracker.lock();
            let snapshot = tracker.update(detections, timestamp_ms, frame_id);
            (snapshot, tracker.total_tracks_created())
        };
        *self.counts.lock() = snapshot;
        self.metrics.inc(&self.metrics.vehicle_frames);
        self.metrics.set(&self.metrics.tracks_created, created);

        if self.detection_stale.swap(false, Ordering::SeqCst) {
            info!("📷 Vehicle camera back at {:.0}ms", timestamp_ms);
            self.log(
                EventCategory::Detection,
                None,
                "Vehicle camera resumed, live counts restored".to_string(),
            );
        }
        snapshot
    }

    /// Feed one frame from the handheld camera. A completed gesture is
    /// queued like any other crossing request.
    pub fn ingest_gesture_frame(
        &self,
        detection: Option<&Detection>,
        frame: FrameGeometry,
        timestamp_ms: f64,
    ) -> GestureUpdate {
        self.advance_clock(timestamp_ms);
        let limit = self.config.engine.detection_silence_ms;
        let (update, silent_for) = {
            let mut gesture = self.gesture.lock();
            let silent_for = gesture
                .last_frame_ms()
                .map(|last| timestamp_ms - last)
                .filter(|gap| *gap > limit);
            // A streak never spans a camera outage
            if silent_for.is_some() {
                gesture.reset();
            }
            (gesture.update(detection, frame, timestamp_ms), silent_for)
        };
        self.metrics.inc(&self.metrics.gesture_frames);

        if let Some(gap) = silent_for {
            warn!("⚠️  Gesture camera was silent for {:.1}s, streak discarded", gap / 1000.0);
            self.log(
                EventCategory::Detection,
                None,
                format!("Gesture camera resumed after {:.1}s silence", gap / 1000.0),
            );
        }

        if let Some(request) = update.request {
            if let Err(e) =
                self.submit_pedestrian(request.direction, timestamp_ms, RequestSource::Gesture)
            {
                debug!("🖐️ Gesture request dropped: {}", e);
            }
        }
        update
    }

    fn submit_pedestrian(
        &self,
        direction: Direction,
        now_ms: f64,
        source: RequestSource,
    ) -> Result<SubmitOutcome, CommandError> {
        if self.emergency.load(Ordering::SeqCst) {
            return Err(CommandError::EmergencyActive);
        }
        let outcome = self.pedestrians.lock().submit(direction, now_ms, source)?;
        if outcome == SubmitOutcome::Queued {
            self.metrics.inc(&self.metrics.pedestrian_requests);
            self.log(
                EventCategory::Pedestrian,
                Some(direction),
                format!("Crossing requested for {} ({:?})", direction, source),
            );
        }
        Ok(outcome)
    }

    // ========================================================================
    // DECISION CYCLE
    // ========================================================================

    /// Run one decision cycle at engine time `now_ms`.
    pub fn step(&self, now_ms: f64, time_of_day: NaiveTime) {
        let started = Instant::now();
        self.advance_clock(now_ms);
        self.metrics.inc(&self.metrics.decisions);

        if self.emergency.load(Ordering::SeqCst) {
            let notices = {
                let mut bank = self.lights.lock();
                if self.emergency.load(Ordering::SeqCst) {
                    bank.force_all_red(now_ms, true);
                }
                bank.tick(now_ms);
                bank.take_notices()
            };
            self.absorb_notices(now_ms, notices);
            return;
        }
        if self.shutting_down.load(Ordering::SeqCst) {
            self.drain_to_red(now_ms);
            return;
        }

        let (views, notices) = {
            let mut bank = self.lights.lock();
            bank.tick(now_ms);
            (bank.views(), bank.take_notices())
        };
        self.absorb_notices(now_ms, notices);

        let counts = self.live_counts(now_ms);
        let pending = self.pedestrians.lock().snapshot();

        let outcome = self.controller.lock().decide(&CycleInput {
            now_ms,
            time_of_day,
            counts: &counts,
            lights: &views,
            pending: &pending,
        });

        if !outcome.served.is_empty() {
            let mut queue = self.pedestrians.lock();
            for request in &outcome.served {
                if queue.mark_served(request.direction, now_ms).is_some() {
                    self.metrics.inc(&self.metrics.pedestrian_served);
                }
            }
        }

        if !outcome.commands.is_empty() {
            let notices = {
                let mut bank = self.lights.lock();
                for command in &outcome.commands {
                    match *command {
                        LightCommand::Activate(dir) => {
                            // Refusals are already recorded as notices
                            let _ = bank.activate(dir, now_ms);
                        }
                        LightCommand::Deactivate(dir) => {
                            bank.deactivate(dir, now_ms);
                        }
                        LightCommand::Recall(dir) => {
                            bank.recall(dir, now_ms);
                        }
                    }
                }
                bank.take_notices()
            };
            self.absorb_notices(now_ms, notices);
        }

        if !outcome.events.is_empty() {
            self.events.lock().extend(now_ms, outcome.events);
        }

        let elapsed_us = started.elapsed().as_micros() as u64;
        self.metrics.set(&self.metrics.decision_time_us, elapsed_us);
    }

    /// Published counts, or zero once the vehicle camera has been silent
    /// past the limit. Going stale drops every track.
    fn live_counts(&self, now_ms: f64) -> DirectionCounts {
        let snapshot = *self.counts.lock();
        let silent_for = now_ms - snapshot.timestamp_ms;
        if silent_for <= self.config.engine.detection_silence_ms {
            return snapshot.counts;
        }
        if !self.detection_stale.swap(true, Ordering::SeqCst) {
            warn!(
                "⚠️  Vehicle camera silent for {:.1}s, degraded mode (counts read as zero)",
                silent_for / 1000.0
            );
            self.tracker.lock().reset();
            self.log(
                EventCategory::Detection,
                None,
                format!(
                    "Vehicle camera silent for {:.1}s, running on zero counts",
                    silent_for / 1000.0
                ),
            );
        }
        DirectionCounts::filled(0)
    }

    pub fn detection_stale(&self) -> bool {
        self.detection_stale.load(Ordering::SeqCst)
    }

    fn absorb_notices(&self, now_ms: f64, notices: Vec<BankNotice>) {
        if notices.is_empty() {
            return;
        }
        let mut entries = Vec::with_capacity(notices.len());
        for notice in notices {
            match notice {
                BankNotice::Transition(t) => {
                    self.metrics.inc(&self.metrics.transitions);
                    entries.push(PendingEvent::new(
                        EventCategory::Transition,
                        Some(t.direction),
                        format!("{} {} → {} ({:?})", t.direction, t.from, t.to, t.kind),
                    ));
                }
                BankNotice::SafetyViolation(v) => {
                    self.metrics.inc(&self.metrics.safety_violations);
                    entries.push(PendingEvent::new(
                        EventCategory::Safety,
                        Some(v.requested),
                        v.to_string(),
                    ));
                }
                BankNotice::ActivationSuppressed(dir) => {
                    debug!("Activation of {} suppressed", dir);
                }
                BankNotice::ActuatorDegraded(e) => {
                    self.metrics.inc(&self.metrics.actuator_failures);
                    entries.push(PendingEvent::new(
                        EventCategory::Actuator,
                        None,
                        format!("Actuator degraded: {}", e),
                    ));
                }
                BankNotice::ActuatorRetryBudgetExceeded { failures } => {
                    entries.push(PendingEvent::new(
                        EventCategory::Actuator,
                        None,
                        format!("Actuator unreachable after {} attempts", failures),
                    ));
                }
                BankNotice::ActuatorRecovered { after_failures } => {
                    entries.push(PendingEvent::new(
                        EventCategory::Actuator,
                        None,
                        format!("Actuator recovered after {} failures", after_failures),
                    ));
                }
            }
        }
        self.events.lock().extend(now_ms, entries);
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    pub fn set_mode(&self, mode: ControllerMode) -> Result<CommandAck, CommandError> {
        if mode == ControllerMode::Emergency {
            return self.emergency_stop();
        }
        if self.emergency.load(Ordering::SeqCst) {
            return Err(self.reject("set_mode", CommandError::EmergencyActive));
        }
        let previous = self
            .controller
            .lock()
            .set_mode(mode)
            .map_err(|e| self.reject("set_mode", e))?;
        let message = format!("Mode {} → {}", previous, mode);
        self.log(EventCategory::Mode, None, message.clone());
        Ok(self.ack("set_mode", message))
    }

    pub fn set_manual(
        &self,
        direction: Direction,
        target: LightState,
    ) -> Result<CommandAck, CommandError> {
        if self.emergency.load(Ordering::SeqCst) {
            return Err(self.reject("set_manual", CommandError::EmergencyActive));
        }
        let lights = self.lights.lock().states();
        self.controller
            .lock()
            .set_manual(direction, target, &lights)
            .map_err(|e| self.reject("set_manual", e))?;
        let message = format!("Manual target {} → {}", direction, target);
        self.log(EventCategory::Manual, Some(direction), message.clone());
        Ok(self.ack("set_manual", message))
    }

    /// Raw-name variant of [`Engine::set_manual`] for external command layers.
    pub fn set_manual_named(&self, direction: &str, target: &str) -> Result<CommandAck, CommandError> {
        let direction: Direction = direction
            .parse()
            .map_err(|e| self.reject("set_manual", e))?;
        let target: LightState = target.parse().map_err(|e| self.reject("set_manual", e))?;
        self.set_manual(direction, target)
    }

    pub fn request_pedestrian(&self, direction: Direction) -> Result<CommandAck, CommandError> {
        let now = self.now_ms();
        let outcome = self
            .submit_pedestrian(direction, now, RequestSource::Manual)
            .map_err(|e| self.reject("request_pedestrian", e))?;
        let message = match outcome {
            SubmitOutcome::Queued => format!("Crossing queued for {}", direction),
            SubmitOutcome::AlreadyPending => format!("Crossing already pending for {}", direction),
        };
        Ok(self.ack("request_pedestrian", message))
    }

    /// Always accepted. All heads go RED now; the decision loop keeps them
    /// there until [`Engine::clear_emergency`].
    pub fn emergency_stop(&self) -> Result<CommandAck, CommandError> {
        let now = self.now_ms();
        let previous = {
            let mut ctrl = self.controller.lock();
            let previous = ctrl
                .set_mode(ControllerMode::Emergency)
                .unwrap_or(ControllerMode::Emergency);
            self.emergency.store(true, Ordering::SeqCst);
            previous
        };
        let notices = {
            let mut bank = self.lights.lock();
            // Skipped only when a clear has already overtaken this stop
            if self.emergency.load(Ordering::SeqCst) {
                bank.force_all_red(now, true);
            }
            bank.take_notices()
        };
        self.absorb_notices(now, notices);
        self.metrics.inc(&self.metrics.emergency_stops);
        error!("🛑 EMERGENCY STOP (was {})", previous);
        let message = format!("Emergency stop, all directions RED (was {})", previous);
        self.log(EventCategory::Emergency, None, message.clone());
        Ok(self.ack("emergency_stop", message))
    }

    pub fn clear_emergency(&self, resume: ControllerMode) -> Result<CommandAck, CommandError> {
        {
            let mut ctrl = self.controller.lock();
            ctrl.clear_emergency(resume)
                .map_err(|e| self.reject("clear_emergency", e))?;
            self.emergency.store(false, Ordering::SeqCst);
        }
        {
            let mut bank = self.lights.lock();
            // A stop that landed after the clear keeps its latch
            if !self.emergency.load(Ordering::SeqCst) {
                bank.unlatch();
            }
        }
        info!("✅ Emergency cleared, resuming {}", resume);
        let message = format!("Emergency cleared, resuming {}", resume);
        self.log(EventCategory::Emergency, None, message.clone());
        Ok(self.ack("clear_emergency", message))
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn get_status(&self) -> StatusSnapshot {
        let (states, actuator, latched, lit_groups) = {
            let bank = self.lights.lock();
            (bank.states(), bank.health(), bank.is_latched(), bank.active_groups())
        };
        let stale = self.detection_stale();
        let counts = if stale {
            DirectionCounts::filled(0)
        } else {
            self.counts.lock().counts
        };
        let (pending, served) = {
            let queue = self.pedestrians.lock();
            (queue.pending_map(), queue.total_served())
        };
        let (mode, active, waiting, plan, cycles, peak, night, manual) = {
            let ctrl = self.controller.lock();
            (
                ctrl.mode(),
                ctrl.active_direction(),
                ctrl.waiting_cycles(),
                ctrl.allocation(),
                ctrl.cycle_count(),
                ctrl.is_peak(),
                ctrl.is_night(),
                ctrl.manual_targets(),
            )
        };
        let gesture = self.gesture.lock().status();

        StatusSnapshot {
            mode,
            directions: Direction::ALL
                .iter()
                .map(|&d| DirectionStatus {
                    direction: d,
                    state: states[d],
                    count: counts[d],
                    waiting_cycles: waiting[d],
                    green_budget_secs: plan[d].green_secs,
                    priority: plan[d].priority,
                    starved: plan[d].starved,
                    pedestrian_pending: pending[d],
                    manual_target: manual[d],
                })
                .collect(),
            active_direction: active,
            peak_hours: peak,
            night_mode: night,
            cycle_count: cycles,
            pedestrian_requests_served: served,
            stats: self.metrics.summary(),
            actuator,
            emergency_latched: latched,
            active_conflict_groups: lit_groups,
            detection_stale: stale,
            gesture,
            engine_time_ms: self.now_ms(),
            timestamp: Utc::now(),
        }
    }

    /// Newest `limit` log entries, oldest first.
    pub fn get_events(&self, limit: usize) -> Vec<EventLogEntry> {
        self.events.lock().recent(limit)
    }

    // ========================================================================
    // RUNTIME
    // ========================================================================

    /// Decision loop. Runs until `shutdown` flips to `true` (or its sender
    /// is dropped), then drains the lights and releases the actuator.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), ActuatorError> {
        let period = Duration::from_millis(self.config.engine.decision_period_ms);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("▶️  Decision loop running every {:?}", period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.step(self.elapsed_ms(), Local::now().time());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown().await
    }

    /// Orderly stop: every head through YELLOW to RED, then hand the
    /// actuator back. Heads still lit after the dwell budget are forced RED.
    pub async fn shutdown(&self) -> Result<(), ActuatorError> {
        info!("⏹️  Shutting down, draining all directions to RED");
        self.shutting_down.store(true, Ordering::SeqCst);
        let timing = &self.config.timing;
        let deadline = self.elapsed_ms() + timing.red_yellow_ms + timing.yellow_ms + 1000.0;

        let mut poll = tokio::time::interval(Duration::from_millis(100));
        loop {
            poll.tick().await;
            let now = self.elapsed_ms();
            if self.drain_to_red(now) {
                break;
            }
            if now >= deadline {
                warn!("⚠️  Drain timed out, forcing RED");
                let notices = {
                    let mut bank = self.lights.lock();
                    bank.force_all_red(now, false);
                    bank.take_notices()
                };
                self.absorb_notices(now, notices);
                break;
            }
        }
        self.release_actuator()
    }

    /// One drain step: deactivate every lit head and advance the dwell
    /// timers. Returns `true` once everything is RED.
    pub fn drain_to_red(&self, now_ms: f64) -> bool {
        self.advance_clock(now_ms);
        self.shutting_down.store(true, Ordering::SeqCst);
        let (all_red, notices) = {
            let mut bank = self.lights.lock();
            bank.tick(now_ms);
            for dir in Direction::ALL {
                bank.deactivate(dir, now_ms);
            }
            (bank.all_red(), bank.take_notices())
        };
        self.absorb_notices(now_ms, notices);
        all_red
    }

    pub fn release_actuator(&self) -> Result<(), ActuatorError> {
        self.lights.lock().release()?;
        self.log(EventCategory::System, None, "Actuator released".to_string());
        Ok(())
    }
}
