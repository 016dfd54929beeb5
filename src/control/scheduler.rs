// src/control/scheduler.rs
//
// Green-time allocation and next-direction selection.
//
// Everything here is a pure function of (counts, waiting cycles, current
// direction, time of day, config). The controller owns the state; this
// module only does arithmetic, so two calls with the same inputs always
// agree.

use crate::types::{Direction, DirectionCounts, DirectionMap};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub t_min_secs: f64,
    pub t_max_secs: f64,
    /// Priority added per waiting cycle
    pub waiting_weight: f64,
    /// Waiting cycles strictly above this mark a direction as starved
    pub starvation_threshold: u32,
    pub starvation_boost: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            t_min_secs: 10.0,
            t_max_secs: 60.0,
            waiting_weight: 5.0,
            starvation_threshold: 3,
            starvation_boost: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeOfDayConfig {
    pub enabled: bool,
    /// `[start, end)` windows; an end before the start wraps midnight
    pub peak_windows: Vec<(NaiveTime, NaiveTime)>,
    pub peak_multiplier: f64,
    pub night_start: NaiveTime,
    pub night_end: NaiveTime,
    /// Below this many vehicles a night-time direction gets the short green
    pub night_low_traffic: usize,
    pub night_min_green_secs: f64,
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default()
}

impl Default for TimeOfDayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            peak_windows: vec![(hm(7, 0), hm(9, 0)), (hm(17, 0), hm(19, 0))],
            peak_multiplier: 1.2,
            night_start: hm(22, 0),
            night_end: hm(6, 0),
            night_low_traffic: 2,
            night_min_green_secs: 5.0,
        }
    }
}

// ============================================================================
// TIME OF DAY
// ============================================================================

fn in_window(t: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        t >= start && t < end
    } else {
        t >= start || t < end
    }
}

pub fn is_peak(tod: &TimeOfDayConfig, t: NaiveTime) -> bool {
    tod.enabled
        && tod
            .peak_windows
            .iter()
            .any(|(start, end)| in_window(t, *start, *end))
}

pub fn is_night(tod: &TimeOfDayConfig, t: NaiveTime) -> bool {
    tod.enabled && in_window(t, tod.night_start, tod.night_end)
}

// ============================================================================
// ALLOCATION
// ============================================================================

/// `T_min + N / max(1, N_max) * (T_max - T_min)`, in seconds.
pub fn green_time(count: usize, max_count: usize, cfg: &SchedulerConfig) -> f64 {
    let ratio = (count as f64 / max_count.max(1) as f64).clamp(0.0, 1.0);
    cfg.t_min_secs + ratio * (cfg.t_max_secs - cfg.t_min_secs)
}

/// [`green_time`] after the peak stretch and the night shortcut.
pub fn effective_green_time(
    count: usize,
    max_count: usize,
    cfg: &SchedulerConfig,
    tod: &TimeOfDayConfig,
    t: NaiveTime,
) -> f64 {
    let mut secs = green_time(count, max_count, cfg);
    if is_peak(tod, t) {
        secs *= tod.peak_multiplier;
    }
    if is_night(tod, t) && count < tod.night_low_traffic {
        secs = (cfg.t_min_secs / 2.0).max(tod.night_min_green_secs);
    }
    secs
}

pub fn is_starved(waiting_cycles: u32, cfg: &SchedulerConfig) -> bool {
    waiting_cycles > cfg.starvation_threshold
}

/// `N + waiting * W`, boosted once the direction is starved.
pub fn priority(count: usize, waiting_cycles: u32, cfg: &SchedulerConfig) -> f64 {
    let base = count as f64 + waiting_cycles as f64 * cfg.waiting_weight;
    if is_starved(waiting_cycles, cfg) {
        base * cfg.starvation_boost
    } else {
        base
    }
}

/// Round-robin order starting after `current` (North first when none).
fn rotation_order(current: Option<Direction>) -> [Direction; 4] {
    let first = current.map(Direction::next).unwrap_or(Direction::North);
    let mut order = [first; 4];
    for i in 1..order.len() {
        order[i] = order[i - 1].next();
    }
    order
}

/// Pick the direction to serve next.
///
/// Starved directions are considered before everyone else; within the
/// considered set the highest priority wins and ties go to whoever comes
/// first after `current` in round-robin order.
pub fn select_next(
    counts: &DirectionCounts,
    waiting: &DirectionMap<u32>,
    current: Option<Direction>,
    cfg: &SchedulerConfig,
) -> Direction {
    let order = rotation_order(current);
    let any_starved = order.iter().any(|d| is_starved(waiting[*d], cfg));

    let mut best: Option<(Direction, f64)> = None;
    for dir in order {
        if any_starved && !is_starved(waiting[dir], cfg) {
            continue;
        }
        let p = priority(counts[dir], waiting[dir], cfg);
        match best {
            Some((_, best_p)) if p <= best_p => {}
            _ => best = Some((dir, p)),
        }
    }
    best.map(|(d, _)| d).unwrap_or(order[0])
}

/// Per-direction view of one allocation pass, for status and logs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Allocation {
    pub green_secs: f64,
    pub priority: f64,
    pub starved: bool,
}

pub fn allocate(
    counts: &DirectionCounts,
    waiting: &DirectionMap<u32>,
    cfg: &SchedulerConfig,
    tod: &TimeOfDayConfig,
    t: NaiveTime,
) -> DirectionMap<Allocation> {
    let max = counts.max_count();
    DirectionMap::from_fn(|d| Allocation {
        green_secs: effective_green_time(counts[d], max, cfg, tod, t),
        priority: priority(counts[d], waiting[d], cfg),
        starved: is_starved(waiting[d], cfg),
    })
}

// ============================================================================
// TESTS
// ============================================================================
