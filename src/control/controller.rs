// src/control/controller.rs
//
// Mode state machine and per-cycle decision logic.
//
// The controller never touches the lights. Each cycle it receives owned
// snapshots (counts, light views, pending crossings) and answers with the
// light commands to apply, the crossings it started serving, and log
// entries. The engine applies the commands under the bank lock.
//
//   AUTO       scheduler-driven rotation + pedestrian preemption
//   MANUAL     external per-direction RED/GREEN targets
//   SIMPLE     one direction, green while vehicles are present
//   EMERGENCY  nothing (the engine holds everything RED)

use super::pedestrian::PedestrianConfig;
use super::scheduler::{self, Allocation, SchedulerConfig, TimeOfDayConfig};
use crate::error::CommandError;
use crate::pipeline::event_log::{EventCategory, PendingEvent};
use crate::signal::light_bank::{ConflictGroups, LightView};
use crate::types::{
    ControllerMode, Direction, DirectionCounts, DirectionMap, LightState, PedestrianRequest,
};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleConfig {
    pub direction: Direction,
    /// GREEN kept after the last vehicle leaves
    pub hold_ms: f64,
}

impl Default for SimpleConfig {
    fn default() -> Self {
        Self {
            direction: Direction::North,
            hold_ms: 5000.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    pub scheduler: SchedulerConfig,
    pub time_of_day: TimeOfDayConfig,
    pub pedestrian: PedestrianConfig,
    pub simple: SimpleConfig,
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PhaseKind {
    Vehicle,
    Pedestrian,
}

/// The direction currently holding (or coming up to) GREEN in AUTO.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GreenPhase {
    pub direction: Direction,
    pub kind: PhaseKind,
    /// Start of the green clock; `None` while the head is still coming up
    pub green_from_ms: Option<f64>,
    /// Fixed length of a pedestrian phase (vehicle phases are re-planned
    /// every cycle from live counts)
    pub budget_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Handover {
    direction: Direction,
    kind: PhaseKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightCommand {
    Activate(Direction),
    Deactivate(Direction),
    Recall(Direction),
}

pub struct CycleInput<'a> {
    pub now_ms: f64,
    pub time_of_day: NaiveTime,
    pub counts: &'a DirectionCounts,
    pub lights: &'a DirectionMap<LightView>,
    /// Oldest first
    pub pending: &'a [PedestrianRequest],
}

#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub commands: Vec<LightCommand>,
    pub served: Vec<PedestrianRequest>,
    pub events: Vec<PendingEvent>,
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct Controller {
    config: ControllerConfig,
    groups: ConflictGroups,
    mode: ControllerMode,
    phase: Option<GreenPhase>,
    handover: Option<Handover>,
    /// Rotations since each direction was last given the green; reset when
    /// its phase is committed
    waiting: DirectionMap<u32>,
    last_direction: Option<Direction>,
    manual: DirectionMap<Option<LightState>>,
    simple_last_seen_ms: Option<f64>,
    cycle_count: u64,
    peak: bool,
    night: bool,
    /// Allocation computed on the last cycle
    plan: DirectionMap<Allocation>,
}

impl Controller {
    pub fn new(config: ControllerConfig, groups: ConflictGroups, mode: ControllerMode) -> Self {
        info!("🧭 Controller starting in {} mode", mode);
        let idle = Allocation {
            green_secs: config.scheduler.t_min_secs,
            priority: 0.0,
            starved: false,
        };
        Self {
            config,
            groups,
            mode,
            phase: None,
            handover: None,
            waiting: DirectionMap::filled(0),
            last_direction: None,
            manual: DirectionMap::filled(None),
            simple_last_seen_ms: None,
            cycle_count: 0,
            peak: false,
            night: false,
            plan: DirectionMap::filled(idle),
        }
    }

    pub fn mode(&self) -> ControllerMode {
        self.mode
    }

    pub fn phase(&self) -> Option<GreenPhase> {
        self.phase
    }

    /// Direction holding or about to receive the green.
    pub fn active_direction(&self) -> Option<Direction> {
        match self.mode {
            ControllerMode::Auto => self
                .phase
                .map(|p| p.direction)
                .or(self.handover.map(|h| h.direction)),
            ControllerMode::Simple => Some(self.config.simple.direction),
            ControllerMode::Manual | ControllerMode::Emergency => None,
        }
    }

    pub fn waiting_cycles(&self) -> DirectionMap<u32> {
        self.waiting
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn is_peak(&self) -> bool {
        self.peak
    }

    pub fn is_night(&self) -> bool {
        self.night
    }

    pub fn allocation(&self) -> DirectionMap<Allocation> {
        self.plan
    }

    pub fn manual_targets(&self) -> DirectionMap<Option<LightState>> {
        self.manual
    }

    // ────────────────────────────────────────────────────────────────────
    // Commands
    // ────────────────────────────────────────────────────────────────────

    /// Returns the previous mode. Leaving EMERGENCY goes through
    /// [`Controller::clear_emergency`] only.
    pub fn set_mode(&mut self, mode: ControllerMode) -> Result<ControllerMode, CommandError> {
        if self.mode == ControllerMode::Emergency && mode != ControllerMode::Emergency {
            return Err(CommandError::EmergencyActive);
        }
        Ok(self.switch_mode(mode))
    }

    pub fn clear_emergency(&mut self, resume: ControllerMode) -> Result<(), CommandError> {
        if self.mode != ControllerMode::Emergency {
            return Err(CommandError::WrongMode {
                required: ControllerMode::Emergency,
                current: self.mode,
            });
        }
        if resume == ControllerMode::Emergency {
            return Err(CommandError::InvalidMode(resume.as_str().to_string()));
        }
        self.switch_mode(resume);
        Ok(())
    }

    fn switch_mode(&mut self, mode: ControllerMode) -> ControllerMode {
        let previous = std::mem::replace(&mut self.mode, mode);
        if previous != mode {
            info!("🧭 Mode {} → {}", previous, mode);
            self.phase = None;
            self.handover = None;
            self.manual = DirectionMap::filled(None);
            self.simple_last_seen_ms = None;
        }
        previous
    }

    /// Record a MANUAL target. Only RED and GREEN are accepted, and GREEN
    /// is refused while a conflicting direction is lit or targeted GREEN.
    pub fn set_manual(
        &mut self,
        direction: Direction,
        target: LightState,
        lights: &DirectionMap<LightState>,
    ) -> Result<(), CommandError> {
        match self.mode {
            ControllerMode::Manual => {}
            ControllerMode::Emergency => return Err(CommandError::EmergencyActive),
            current => {
                return Err(CommandError::WrongMode {
                    required: ControllerMode::Manual,
                    current,
                })
            }
        }
        if !matches!(target, LightState::Red | LightState::Green) {
            return Err(CommandError::InvalidState(target.as_str().to_string()));
        }
        if target == LightState::Green {
            let blocking = Direction::ALL.iter().copied().find(|other| {
                self.groups.conflicts(direction, *other)
                    && (!lights[*other].is_red() || self.manual[*other] == Some(LightState::Green))
            });
            if let Some(blocking) = blocking {
                return Err(CommandError::SafetyConflict {
                    direction,
                    blocking,
                });
            }
        }
        info!("🕹️  Manual target {} → {}", direction, target);
        self.manual[direction] = Some(target);
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────
    // Decision cycle
    // ────────────────────────────────────────────────────────────────────

    pub fn decide(&mut self, input: &CycleInput<'_>) -> CycleOutcome {
        self.peak = scheduler::is_peak(&self.config.time_of_day, input.time_of_day);
        self.night = scheduler::is_night(&self.config.time_of_day, input.time_of_day);

        let mut out = CycleOutcome::default();
        match self.mode {
            ControllerMode::Emergency => {}
            ControllerMode::Manual => self.decide_manual(input, &mut out),
            ControllerMode::Simple => self.decide_simple(input, &mut out),
            ControllerMode::Auto => self.decide_auto(input, &mut out),
        }
        self.plan = scheduler::allocate(
            input.counts,
            &self.waiting,
            &self.config.scheduler,
            &self.config.time_of_day,
            input.time_of_day,
        );
        out
    }

    fn conflicts_red(&self, dir: Direction, lights: &DirectionMap<LightView>) -> bool {
        Direction::ALL
            .iter()
            .all(|o| !self.groups.conflicts(dir, *o) || lights[*o].state.is_red())
    }

    fn clear_conflicts(&self, dir: Direction, lights: &DirectionMap<LightView>, out: &mut CycleOutcome) {
        for other in Direction::ALL {
            if self.groups.conflicts(dir, other)
                && matches!(lights[other].state, LightState::Green | LightState::RedYellow)
            {
                out.commands.push(LightCommand::Deactivate(other));
            }
        }
    }

    fn decide_manual(&mut self, input: &CycleInput<'_>, out: &mut CycleOutcome) {
        for dir in Direction::ALL {
            match (self.manual[dir], input.lights[dir].state) {
                (Some(LightState::Green), LightState::Red) if self.conflicts_red(dir, input.lights) => {
                    out.commands.push(LightCommand::Activate(dir));
                }
                (Some(LightState::Red), LightState::Green | LightState::RedYellow) => {
                    out.commands.push(LightCommand::Deactivate(dir));
                }
                _ => {}
            }
        }
    }

    fn decide_simple(&mut self, input: &CycleInput<'_>, out: &mut CycleOutcome) {
        let dir = self.config.simple.direction;
        for other in Direction::ALL {
            if other != dir
                && matches!(input.lights[other].state, LightState::Green | LightState::RedYellow)
            {
                out.commands.push(LightCommand::Deactivate(other));
            }
        }

        let state = input.lights[dir].state;
        if input.counts[dir] > 0 {
            self.simple_last_seen_ms = Some(input.now_ms);
            match state {
                LightState::Red if self.conflicts_red(dir, input.lights) => {
                    out.commands.push(LightCommand::Activate(dir));
                }
                LightState::Yellow => {
                    debug!("🚗 Vehicle back on {}, recalling GREEN", dir);
                    out.commands.push(LightCommand::Recall(dir));
                    out.events.push(PendingEvent::new(
                        EventCategory::Schedule,
                        Some(dir),
                        format!("Vehicle returned to {}, yellow recalled", dir),
                    ));
                }
                _ => {}
            }
        } else if matches!(state, LightState::Green | LightState::RedYellow) {
            let last_seen = *self.simple_last_seen_ms.get_or_insert(input.now_ms);
            if input.now_ms - last_seen >= self.config.simple.hold_ms {
                out.commands.push(LightCommand::Deactivate(dir));
            }
        }
    }

    fn decide_auto(&mut self, input: &CycleInput<'_>, out: &mut CycleOutcome) {
        if let Some(handover) = self.handover {
            self.try_handover(handover, input, out);
            return;
        }
        let Some(mut phase) = self.phase else {
            self.start_fresh(input, out);
            return;
        };

        let view = input.lights[phase.direction];
        match view.state {
            LightState::Red => {
                if phase.green_from_ms.is_some() {
                    warn!("⚠️  {} lost its green, re-planning", phase.direction);
                    self.phase = None;
                    self.start_fresh(input, out);
                } else if self.conflicts_red(phase.direction, input.lights) {
                    out.commands.push(LightCommand::Activate(phase.direction));
                } else {
                    self.clear_conflicts(phase.direction, input.lights, out);
                }
                return;
            }
            LightState::RedYellow | LightState::Yellow => return,
            LightState::Green => {}
        }

        let green_from = *phase.green_from_ms.get_or_insert(view.entered_ms);
        self.phase = Some(phase);
        let elapsed = input.now_ms - green_from;

        if let Some(request) = input.pending.first().copied() {
            let ready = match phase.kind {
                PhaseKind::Vehicle => elapsed >= self.config.pedestrian.min_vehicle_dwell_ms,
                PhaseKind::Pedestrian => elapsed >= phase.budget_ms,
            };
            if ready {
                self.begin_pedestrian(request, phase, input, out);
            }
            return;
        }

        let budget = match phase.kind {
            PhaseKind::Vehicle => self.vehicle_budget_ms(phase.direction, input),
            PhaseKind::Pedestrian => phase.budget_ms,
        };
        if elapsed >= budget {
            self.rotate(phase.direction, input, out);
        }
    }

    fn vehicle_budget_ms(&self, dir: Direction, input: &CycleInput<'_>) -> f64 {
        scheduler::effective_green_time(
            input.counts[dir],
            input.counts.max_count(),
            &self.config.scheduler,
            &self.config.time_of_day,
            input.time_of_day,
        ) * 1000.0
    }

    /// No phase at all: serve the oldest crossing, adopt a head that is
    /// already GREEN, or ask the scheduler.
    fn start_fresh(&mut self, input: &CycleInput<'_>, out: &mut CycleOutcome) {
        if let Some(request) = input.pending.first().copied() {
            self.serve(request, input.now_ms, out);
            self.begin_handover(None, request.direction, PhaseKind::Pedestrian, input, out);
            return;
        }

        if let Some(dir) = Direction::ALL
            .iter()
            .copied()
            .find(|d| input.lights[*d].state == LightState::Green)
        {
            debug!("🧭 Adopting {} as the active green", dir);
            self.phase = Some(GreenPhase {
                direction: dir,
                kind: PhaseKind::Vehicle,
                green_from_ms: Some(input.lights[dir].entered_ms),
                budget_ms: 0.0,
            });
            self.waiting[dir] = 0;
            self.last_direction = Some(dir);
            return;
        }

        let next = scheduler::select_next(
            input.counts,
            &self.waiting,
            self.last_direction,
            &self.config.scheduler,
        );
        out.events.push(PendingEvent::new(
            EventCategory::Schedule,
            Some(next),
            format!("Serving {} first ({} vehicles)", next, input.counts[next]),
        ));
        self.begin_handover(None, next, PhaseKind::Vehicle, input, out);
    }

    fn begin_pedestrian(
        &mut self,
        request: PedestrianRequest,
        phase: GreenPhase,
        input: &CycleInput<'_>,
        out: &mut CycleOutcome,
    ) {
        self.serve(request, input.now_ms, out);
        if request.direction == phase.direction {
            self.phase = Some(GreenPhase {
                direction: phase.direction,
                kind: PhaseKind::Pedestrian,
                green_from_ms: Some(input.now_ms),
                budget_ms: self.config.pedestrian.green_ms,
            });
        } else {
            self.phase = None;
            self.begin_handover(
                Some(phase.direction),
                request.direction,
                PhaseKind::Pedestrian,
                input,
                out,
            );
        }
    }

    fn serve(&mut self, request: PedestrianRequest, now_ms: f64, out: &mut CycleOutcome) {
        let waited = (now_ms - request.requested_at_ms).max(0.0) / 1000.0;
        info!(
            "🚶 Pedestrian phase for {} ({:.0}s green, waited {:.1}s)",
            request.direction,
            self.config.pedestrian.green_ms / 1000.0,
            waited
        );
        out.events.push(PendingEvent::new(
            EventCategory::Pedestrian,
            Some(request.direction),
            format!(
                "Pedestrian phase for {} after {:.1}s wait ({:?})",
                request.direction, waited, request.source
            ),
        ));
        out.served.push(request);
    }

    /// Rotation point: the active direction finished its green.
    fn rotate(&mut self, current: Direction, input: &CycleInput<'_>, out: &mut CycleOutcome) {
        for dir in Direction::ALL {
            if dir == current {
                self.waiting[dir] = 0;
            } else {
                self.waiting[dir] = self.waiting[dir].saturating_add(1);
            }
        }
        self.cycle_count += 1;

        let next = scheduler::select_next(
            input.counts,
            &self.waiting,
            Some(current),
            &self.config.scheduler,
        );
        if next == current {
            debug!("🔁 Cycle {}: {} keeps the green", self.cycle_count, current);
            self.phase = Some(GreenPhase {
                direction: current,
                kind: PhaseKind::Vehicle,
                green_from_ms: Some(input.now_ms),
                budget_ms: 0.0,
            });
            return;
        }

        info!(
            "🔄 Cycle {}: {} → {} (N={}, waited {} cycles)",
            self.cycle_count, current, next, input.counts[next], self.waiting[next]
        );
        out.events.push(PendingEvent::new(
            EventCategory::Schedule,
            Some(next),
            format!(
                "Cycle {}: {} hands over to {} ({} vehicles, waited {} cycles)",
                self.cycle_count, current, next, input.counts[next], self.waiting[next]
            ),
        ));
        self.phase = None;
        self.begin_handover(Some(current), next, PhaseKind::Vehicle, input, out);
    }

    fn begin_handover(
        &mut self,
        from: Option<Direction>,
        to: Direction,
        kind: PhaseKind,
        input: &CycleInput<'_>,
        out: &mut CycleOutcome,
    ) {
        if let Some(from) = from.filter(|f| *f != to) {
            if !self.groups.conflicts(from, to)
                && matches!(input.lights[from].state, LightState::Green | LightState::RedYellow)
            {
                out.commands.push(LightCommand::Deactivate(from));
            }
        }
        let handover = Handover { direction: to, kind };
        self.handover = Some(handover);
        self.try_handover(handover, input, out);
    }

    fn try_handover(&mut self, handover: Handover, input: &CycleInput<'_>, out: &mut CycleOutcome) {
        if !self.conflicts_red(handover.direction, input.lights) {
            self.clear_conflicts(handover.direction, input.lights, out);
            return;
        }

        let already_green = input.lights[handover.direction].state == LightState::Green;
        if !already_green {
            out.commands.push(LightCommand::Activate(handover.direction));
        }
        self.phase = Some(GreenPhase {
            direction: handover.direction,
            kind: handover.kind,
            green_from_ms: already_green.then_some(input.now_ms),
            budget_ms: match handover.kind {
                PhaseKind::Pedestrian => self.config.pedestrian.green_ms,
                PhaseKind::Vehicle => 0.0,
            },
        });
        self.handover = None;
        self.waiting[handover.direction] = 0;
        self.last_direction = Some(handover.direction);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestSource;

    fn controller(mode: ControllerMode) -> Controller {
        Controller::new(ControllerConfig::default(), ConflictGroups::exclusive(), mode)
    }

    fn counts(n: usize, e: usize, s: usize, w: usize) -> DirectionCounts {
        let values = [n, e, s, w];
        DirectionMap::from_fn(|d| values[d.index()])
    }

    fn all_red() -> DirectionMap<LightView> {
        DirectionMap::filled(LightView {
            state: LightState::Red,
            entered_ms: 0.0,
        })
    }

    fn lit(dir: Direction, state: LightState, entered_ms: f64) -> DirectionMap<LightView> {
        let mut views = all_red();
        views[dir] = LightView { state, entered_ms };
        views
    }

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    fn run(
        ctrl: &mut Controller,
        now_ms: f64,
        counts: &DirectionCounts,
        lights: &DirectionMap<LightView>,
        pending: &[PedestrianRequest],
    ) -> CycleOutcome {
        ctrl.decide(&CycleInput {
            now_ms,
            time_of_day: noon(),
            counts,
            lights,
            pending,
        })
    }

    fn states(views: &DirectionMap<LightView>) -> DirectionMap<LightState> {
        DirectionMap::from_fn(|d| views[d].state)
    }

    #[test]
    fn test_auto_first_cycle_activates_heaviest_direction() {
        let mut ctrl = controller(ControllerMode::Auto);
        let out = run(&mut ctrl, 0.0, &counts(5, 1, 0, 0), &all_red(), &[]);
        assert_eq!(out.commands, vec![LightCommand::Activate(Direction::North)]);
        assert_eq!(ctrl.active_direction(), Some(Direction::North));
    }

    #[test]
    fn test_auto_rotation_waits_for_all_red() {
        let mut ctrl = controller(ControllerMode::Auto);
        let c = counts(0, 3, 0, 0);
        run(&mut ctrl, 0.0, &counts(5, 0, 0, 0), &all_red(), &[]);
        // North GREEN since 1s; budget with N=0, N_max=3 is T_min = 10s
        let out = run(&mut ctrl, 5_000.0, &c, &lit(Direction::North, LightState::Green, 1000.0), &[]);
        assert!(out.commands.is_empty());

        let out = run(&mut ctrl, 11_000.0, &c, &lit(Direction::North, LightState::Green, 1000.0), &[]);
        assert_eq!(out.commands, vec![LightCommand::Deactivate(Direction::North)]);
        assert_eq!(ctrl.cycle_count(), 1);
        assert_eq!(ctrl.active_direction(), Some(Direction::East));

        let out = run(&mut ctrl, 12_000.0, &c, &lit(Direction::North, LightState::Yellow, 11_000.0), &[]);
        assert!(!out.commands.contains(&LightCommand::Activate(Direction::East)));

        let out = run(&mut ctrl, 13_000.0, &c, &all_red(), &[]);
        assert_eq!(out.commands, vec![LightCommand::Activate(Direction::East)]);
    }

    #[test]
    fn test_waiting_cycles_count_rotations() {
        let mut ctrl = controller(ControllerMode::Auto);
        let c = counts(50, 1, 0, 0);
        run(&mut ctrl, 0.0, &c, &all_red(), &[]);
        let green = lit(Direction::North, LightState::Green, 0.0);
        // Many ticks inside one green do not age anyone
        for t in 1..10 {
            run(&mut ctrl, t as f64 * 1000.0, &c, &green, &[]);
        }
        assert_eq!(ctrl.waiting_cycles()[Direction::East], 0);

        run(&mut ctrl, 60_000.0, &c, &green, &[]);
        assert_eq!(ctrl.cycle_count(), 1);
        assert_eq!(ctrl.waiting_cycles()[Direction::North], 0);
        assert_eq!(ctrl.waiting_cycles()[Direction::East], 1);
        // North re-selected: green extended, not handed over
        assert_eq!(ctrl.phase().unwrap().green_from_ms, Some(60_000.0));
    }

    #[test]
    fn test_waiting_cycles_reset_when_phase_committed() {
        let mut ctrl = controller(ControllerMode::Auto);
        let c = counts(0, 3, 0, 0);
        run(&mut ctrl, 0.0, &counts(5, 0, 0, 0), &all_red(), &[]);
        run(&mut ctrl, 11_000.0, &c, &lit(Direction::North, LightState::Green, 1000.0), &[]);
        // East picked but North still lit: not served yet
        assert_eq!(ctrl.active_direction(), Some(Direction::East));
        assert_eq!(ctrl.waiting_cycles()[Direction::East], 1);

        let out = run(&mut ctrl, 13_000.0, &c, &all_red(), &[]);
        assert_eq!(out.commands, vec![LightCommand::Activate(Direction::East)]);
        assert_eq!(ctrl.waiting_cycles()[Direction::East], 0);
        assert_eq!(ctrl.waiting_cycles()[Direction::North], 0);
    }

    #[test]
    fn test_allocation_follows_last_cycle() {
        let mut ctrl = controller(ControllerMode::Auto);
        assert_eq!(ctrl.allocation()[Direction::East].green_secs, 10.0);
        run(&mut ctrl, 0.0, &counts(5, 1, 0, 0), &all_red(), &[]);
        let plan = ctrl.allocation();
        assert_eq!(plan[Direction::North].green_secs, 60.0);
        assert_eq!(plan[Direction::East].green_secs, 20.0);
        assert_eq!(plan[Direction::North].priority, 5.0);
    }

    #[test]
    fn test_pedestrian_preempts_after_min_dwell() {
        let mut ctrl = controller(ControllerMode::Auto);
        let c = counts(8, 0, 0, 0);
        run(&mut ctrl, 0.0, &c, &all_red(), &[]);
        let green = lit(Direction::North, LightState::Green, 1000.0);
        let pending = [PedestrianRequest::new(Direction::East, 2000.0, RequestSource::Manual)];

        let out = run(&mut ctrl, 4_000.0, &c, &green, &pending);
        assert!(out.served.is_empty());

        let out = run(&mut ctrl, 6_000.0, &c, &green, &pending);
        assert_eq!(out.served.len(), 1);
        assert_eq!(out.commands, vec![LightCommand::Deactivate(Direction::North)]);
        assert!(out.events.iter().any(|e| e.category == EventCategory::Pedestrian));

        // Phase for East runs its fixed budget once GREEN
        run(&mut ctrl, 9_000.0, &c, &all_red(), &[]);
        let east = lit(Direction::East, LightState::Green, 10_000.0);
        let out = run(&mut ctrl, 24_000.0, &c, &east, &[]);
        assert!(out.commands.is_empty());
        let out = run(&mut ctrl, 25_000.0, &c, &east, &[]);
        assert_eq!(out.commands, vec![LightCommand::Deactivate(Direction::East)]);
    }

    #[test]
    fn test_pedestrian_on_active_direction_extends_in_place() {
        let mut ctrl = controller(ControllerMode::Auto);
        let c = counts(3, 0, 0, 0);
        run(&mut ctrl, 0.0, &c, &all_red(), &[]);
        let green = lit(Direction::North, LightState::Green, 1000.0);
        let pending = [PedestrianRequest::new(Direction::North, 500.0, RequestSource::Gesture)];
        let out = run(&mut ctrl, 6_000.0, &c, &green, &pending);
        assert_eq!(out.served.len(), 1);
        assert!(out.commands.is_empty());
        let phase = ctrl.phase().unwrap();
        assert_eq!(phase.kind, PhaseKind::Pedestrian);
        assert_eq!(phase.green_from_ms, Some(6_000.0));
    }

    #[test]
    fn test_manual_command_validation() {
        let mut ctrl = controller(ControllerMode::Auto);
        let red = states(&all_red());
        assert_eq!(
            ctrl.set_manual(Direction::North, LightState::Green, &red),
            Err(CommandError::WrongMode {
                required: ControllerMode::Manual,
                current: ControllerMode::Auto
            })
        );

        ctrl.set_mode(ControllerMode::Manual).unwrap();
        assert_eq!(
            ctrl.set_manual(Direction::North, LightState::Yellow, &red)
                .unwrap_err()
                .reason_code(),
            "INVALID_STATE"
        );
        ctrl.set_manual(Direction::North, LightState::Green, &red).unwrap();
        assert_eq!(
            ctrl.set_manual(Direction::East, LightState::Green, &red),
            Err(CommandError::SafetyConflict {
                direction: Direction::East,
                blocking: Direction::North
            })
        );
        // Targets are unchanged by the refusal
        assert_eq!(ctrl.manual_targets()[Direction::East], None);
    }

    #[test]
    fn test_manual_drives_targets_through_legal_edges() {
        let mut ctrl = controller(ControllerMode::Manual);
        let c = counts(0, 0, 0, 0);
        ctrl.set_manual(Direction::West, LightState::Green, &states(&all_red()))
            .unwrap();
        let out = run(&mut ctrl, 0.0, &c, &all_red(), &[]);
        assert_eq!(out.commands, vec![LightCommand::Activate(Direction::West)]);

        let green = lit(Direction::West, LightState::Green, 1000.0);
        ctrl.set_manual(Direction::West, LightState::Red, &states(&green)).unwrap();
        let out = run(&mut ctrl, 2000.0, &c, &green, &[]);
        assert_eq!(out.commands, vec![LightCommand::Deactivate(Direction::West)]);
    }

    #[test]
    fn test_simple_mode_hold_then_recall() {
        let mut ctrl = controller(ControllerMode::Simple);
        let present = counts(1, 0, 0, 0);
        let absent = counts(0, 0, 0, 0);

        let out = run(&mut ctrl, 0.0, &present, &all_red(), &[]);
        assert_eq!(out.commands, vec![LightCommand::Activate(Direction::North)]);

        let green = lit(Direction::North, LightState::Green, 1000.0);
        run(&mut ctrl, 1000.0, &present, &green, &[]);
        let out = run(&mut ctrl, 5_999.0, &absent, &green, &[]);
        assert!(out.commands.is_empty());
        let out = run(&mut ctrl, 6_000.0, &absent, &green, &[]);
        assert_eq!(out.commands, vec![LightCommand::Deactivate(Direction::North)]);

        let yellow = lit(Direction::North, LightState::Yellow, 6_000.0);
        let out = run(&mut ctrl, 7_000.0, &present, &yellow, &[]);
        assert_eq!(out.commands, vec![LightCommand::Recall(Direction::North)]);
    }

    #[test]
    fn test_simple_mode_drives_other_directions_red() {
        let mut ctrl = controller(ControllerMode::Simple);
        let out = run(
            &mut ctrl,
            0.0,
            &counts(0, 4, 0, 0),
            &lit(Direction::East, LightState::Green, 0.0),
            &[],
        );
        assert_eq!(out.commands, vec![LightCommand::Deactivate(Direction::East)]);
    }

    #[test]
    fn test_emergency_exit_only_through_clear() {
        let mut ctrl = controller(ControllerMode::Auto);
        ctrl.set_mode(ControllerMode::Emergency).unwrap();
        assert_eq!(
            ctrl.set_mode(ControllerMode::Auto),
            Err(CommandError::EmergencyActive)
        );
        assert_eq!(
            ctrl.set_manual(Direction::North, LightState::Green, &states(&all_red())),
            Err(CommandError::EmergencyActive)
        );
        let out = run(&mut ctrl, 0.0, &counts(9, 9, 9, 9), &all_red(), &[]);
        assert!(out.commands.is_empty());

        assert!(ctrl.clear_emergency(ControllerMode::Emergency).is_err());
        ctrl.clear_emergency(ControllerMode::Auto).unwrap();
        assert_eq!(ctrl.mode(), ControllerMode::Auto);
        assert_eq!(
            ctrl.clear_emergency(ControllerMode::Auto).unwrap_err().reason_code(),
            "WRONG_MODE"
        );
    }
}
