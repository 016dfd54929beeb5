// tests/scenarios.rs
//
// End-to-end runs through the public engine surface with a simulated
// actuator and hand-built detection frames.

use chrono::NaiveTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use traffic_signal_engine::control::scheduler::{green_time, select_next, SchedulerConfig};
use traffic_signal_engine::pipeline::EventCategory;
use traffic_signal_engine::signal::{SimulatedActuator, SimulatedActuatorHandle};
use traffic_signal_engine::types::{
    ActuatorOutput, BBox, ControllerMode, Detection, Direction, DirectionMap, FrameGeometry,
    LightState, ObjectClass,
};
use traffic_signal_engine::{CommandError, Config, Engine};

// ============================================================================
// HELPERS
// ============================================================================

fn engine_with(config: Config) -> (Engine, SimulatedActuatorHandle) {
    let (actuator, handle) = SimulatedActuator::new();
    let engine = Engine::new(config, Box::new(actuator)).unwrap();
    (engine, handle)
}

fn noon() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap()
}

/// `n` stationary cars inside `dir`'s default zone.
fn cars(dir: Direction, n: usize) -> Vec<Detection> {
    (0..n)
        .map(|i| {
            let offset = 0.02 + 0.045 * i as f32;
            let (cx, cy) = match dir {
                Direction::North => (offset, 0.08 + 0.1 * (i % 2) as f32),
                Direction::East => (0.52 + offset * 0.45, 0.3 + 0.2 * (i % 3) as f32),
                Direction::South => (offset, 0.82 + 0.1 * (i % 2) as f32),
                Direction::West => (0.02 + offset * 0.45, 0.3 + 0.2 * (i % 3) as f32),
            };
            Detection::new(
                ObjectClass::Car,
                0.9,
                BBox::new(cx - 0.01, cy - 0.01, cx + 0.01, cy + 0.01),
            )
        })
        .collect()
}

fn frame(groups: &[(Direction, usize)]) -> Vec<Detection> {
    groups.iter().flat_map(|(d, n)| cars(*d, *n)).collect()
}

fn state(engine: &Engine, dir: Direction) -> LightState {
    engine.get_status().state(dir).unwrap()
}

fn non_red(engine: &Engine) -> Vec<Direction> {
    let status = engine.get_status();
    Direction::ALL
        .iter()
        .copied()
        .filter(|d| status.state(*d) != Some(LightState::Red))
        .collect()
}

fn raised_hand() -> Detection {
    Detection::new(
        ObjectClass::TrafficLight,
        0.8,
        BBox::new(0.3, 0.3, 0.7, 0.7),
    )
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn test_scenario_proportional_allocation_selects_north() {
    let cfg = SchedulerConfig::default();
    let values = [5usize, 1, 0, 0];
    let counts = DirectionMap::from_fn(|d| values[d.index()]);
    let max = counts.max_count();
    assert_eq!(green_time(counts[Direction::North], max, &cfg), 60.0);
    assert_eq!(green_time(counts[Direction::East], max, &cfg), 20.0);
    assert_eq!(green_time(counts[Direction::South], max, &cfg), 10.0);
    assert_eq!(green_time(counts[Direction::West], max, &cfg), 10.0);
    assert_eq!(
        select_next(&counts, &DirectionMap::filled(0), None, &cfg),
        Direction::North
    );

    // Same through the engine
    let (engine, _handle) = engine_with(Config::default());
    let snapshot = engine.ingest_vehicle_frame(
        &frame(&[(Direction::North, 5), (Direction::East, 1)]),
        0.0,
        0,
    );
    assert_eq!(snapshot.counts[Direction::North], 5);
    assert_eq!(snapshot.counts[Direction::East], 1);

    engine.step(0.0, noon());
    assert_eq!(state(&engine, Direction::North), LightState::RedYellow);
    assert_eq!(engine.get_status().active_direction, Some(Direction::North));
}

#[test]
fn test_scenario_simple_mode_timing_and_recall() {
    let mut config = Config::default();
    config.engine.initial_mode = ControllerMode::Simple;
    config.tracker.max_stale_frames = 0;

    for recall in [false, true] {
        let (engine, _handle) = engine_with(config.clone());
        let mut frame_id = 0;
        let mut tick = |t: f64, present: bool| {
            let detections = if present { cars(Direction::North, 1) } else { Vec::new() };
            engine.ingest_vehicle_frame(&detections, t, frame_id);
            frame_id += 1;
            engine.step(t, noon());
            state(&engine, Direction::North)
        };

        assert_eq!(tick(0.0, true), LightState::RedYellow);
        assert_eq!(tick(1000.0, true), LightState::Green);
        for t in [2000.0, 3000.0, 4000.0, 5000.0] {
            assert_eq!(tick(t, false), LightState::Green, "t={}", t);
        }
        assert_eq!(tick(6000.0, false), LightState::Yellow);

        if recall {
            assert_eq!(tick(7000.0, true), LightState::Green);
        } else {
            assert_eq!(tick(7000.0, false), LightState::Yellow);
            assert_eq!(tick(8000.0, false), LightState::Red);
        }
    }
}

#[test]
fn test_scenario_emergency_stop_and_clear() {
    let (engine, mut handle) = engine_with(Config::default());
    let traffic = frame(&[(Direction::North, 4)]);
    engine.ingest_vehicle_frame(&traffic, 0.0, 0);
    engine.step(0.0, noon());
    engine.ingest_vehicle_frame(&traffic, 1000.0, 1);
    engine.step(1000.0, noon());
    assert_eq!(state(&engine, Direction::North), LightState::Green);

    engine.emergency_stop().unwrap();
    let status = engine.get_status();
    assert_eq!(status.mode, ControllerMode::Emergency);
    assert!(status.all_red());
    assert_eq!(handle.outputs()[Direction::North], ActuatorOutput::Red);

    for t in [2000.0, 3000.0, 4000.0] {
        engine.ingest_vehicle_frame(&traffic, t, 2);
        engine.step(t, noon());
        assert!(engine.get_status().all_red());
    }

    let err = engine.set_mode(ControllerMode::Auto).unwrap_err();
    assert_eq!(err.reason_code(), "EMERGENCY_ACTIVE");
    assert_eq!(
        engine.request_pedestrian(Direction::East).unwrap_err(),
        CommandError::EmergencyActive
    );
    assert_eq!(
        engine.set_manual(Direction::East, LightState::Green).unwrap_err(),
        CommandError::EmergencyActive
    );

    engine.clear_emergency(ControllerMode::Auto).unwrap();
    engine.step(5000.0, noon());
    assert_eq!(state(&engine, Direction::North), LightState::RedYellow);
    assert_eq!(engine.get_status().stats.emergency_stops, 1);
    assert!(engine
        .get_events(50)
        .iter()
        .any(|e| e.category == EventCategory::Emergency));
}

#[test]
fn test_scenario_gesture_timing() {
    // 2.1 s of steady gesture: exactly one request
    let (engine, _handle) = engine_with(Config::default());
    let hand = raised_hand();
    let mut emitted = 0;
    let mut t = 0.0;
    while t <= 2100.0 {
        if engine
            .ingest_gesture_frame(Some(&hand), FrameGeometry::UNIT, t)
            .request
            .is_some()
        {
            emitted += 1;
        }
        t += 50.0;
    }
    assert_eq!(emitted, 1);
    let status = engine.get_status();
    assert!(status.direction(Direction::North).unwrap().pedestrian_pending);
    assert_eq!(status.stats.pedestrian_requests, 1);

    // 1.5 s then the hand drops: nothing
    let (engine, _handle) = engine_with(Config::default());
    let mut t = 0.0;
    while t <= 1500.0 {
        assert!(engine
            .ingest_gesture_frame(Some(&hand), FrameGeometry::UNIT, t)
            .request
            .is_none());
        t += 50.0;
    }
    while t <= 4000.0 {
        assert!(engine
            .ingest_gesture_frame(None, FrameGeometry::UNIT, t)
            .request
            .is_none());
        t += 50.0;
    }
    assert_eq!(engine.get_status().stats.pedestrian_requests, 0);
}

// ============================================================================
// PROPERTIES
// ============================================================================

#[test]
fn test_pedestrian_cooldown_prevents_second_service() {
    let (engine, _handle) = engine_with(Config::default());
    let traffic = frame(&[(Direction::North, 3)]);
    let mut t = 0.0;
    let mut run_until = |engine: &Engine, until: f64| {
        while t <= until {
            engine.ingest_vehicle_frame(&traffic, t, (t / 1000.0) as u64);
            engine.step(t, noon());
            t += 1000.0;
        }
    };

    run_until(&engine, 1000.0);
    assert_eq!(state(&engine, Direction::North), LightState::Green);
    engine.request_pedestrian(Direction::East).unwrap();

    // North keeps its minimum dwell, then hands over
    run_until(&engine, 5000.0);
    assert_eq!(engine.get_status().stats.pedestrian_served, 0);
    run_until(&engine, 6000.0);
    assert_eq!(engine.get_status().stats.pedestrian_served, 1);
    assert_eq!(state(&engine, Direction::North), LightState::Yellow);

    let err = engine.request_pedestrian(Direction::East).unwrap_err();
    assert_eq!(err.reason_code(), "COOLDOWN");

    run_until(&engine, 9000.0);
    assert_eq!(state(&engine, Direction::East), LightState::Green);

    run_until(&engine, 30_000.0);
    assert_eq!(engine.get_status().stats.pedestrian_served, 1);
    assert_eq!(engine.get_status().pedestrian_requests_served, 1);
}

#[test]
fn test_starved_direction_served_at_next_rotation() {
    let (engine, _handle) = engine_with(Config::default());
    let traffic = frame(&[(Direction::North, 20), (Direction::East, 1)]);

    let mut first_east = None;
    let mut t = 0.0;
    while t <= 400_000.0 {
        engine.ingest_vehicle_frame(&traffic, t, (t / 1000.0) as u64);
        engine.step(t, noon());
        let status = engine.get_status();
        if status.state(Direction::East) != Some(LightState::Red) {
            first_east = Some(status.cycle_count);
            break;
        }
        t += 1000.0;
    }
    // Rotations 1-3 re-select the heavy North; East is starved at the 4th
    assert_eq!(first_east, Some(4));
}

#[test]
fn test_manual_commands_through_engine() {
    let (engine, _handle) = engine_with(Config::default());
    assert_eq!(
        engine
            .set_manual(Direction::North, LightState::Green)
            .unwrap_err()
            .reason_code(),
        "WRONG_MODE"
    );

    engine.set_mode(ControllerMode::Manual).unwrap();
    engine.set_manual(Direction::North, LightState::Green).unwrap();
    engine.step(0.0, noon());
    assert_eq!(state(&engine, Direction::North), LightState::RedYellow);

    let err = engine.set_manual(Direction::East, LightState::Green).unwrap_err();
    assert_eq!(err.reason_code(), "SAFETY_CONFLICT");
    assert_eq!(
        engine.set_manual_named("up", "green").unwrap_err().reason_code(),
        "UNKNOWN_DIRECTION"
    );
    assert_eq!(
        engine.set_manual_named("north", "purple").unwrap_err().reason_code(),
        "INVALID_STATE"
    );

    engine.step(1000.0, noon());
    assert_eq!(state(&engine, Direction::North), LightState::Green);
    engine.set_manual_named("N", "red").unwrap();
    engine.step(2000.0, noon());
    assert_eq!(state(&engine, Direction::North), LightState::Yellow);
    engine.step(4000.0, noon());
    assert_eq!(state(&engine, Direction::North), LightState::Red);
    assert!(engine.get_status().stats.commands_rejected >= 4);
}

#[test]
fn test_actuator_outage_is_survived() {
    let (engine, handle) = engine_with(Config::default());
    let traffic = frame(&[(Direction::West, 2)]);
    handle.set_failing(true);

    let mut t = 0.0;
    while t <= 3000.0 {
        engine.ingest_vehicle_frame(&traffic, t, 0);
        engine.step(t, noon());
        t += 1000.0;
    }
    let status = engine.get_status();
    assert!(status.actuator.degraded);
    assert!(status.stats.actuator_failures >= 1);
    // Logical state kept moving
    assert_eq!(status.state(Direction::West), Some(LightState::Green));

    handle.set_failing(false);
    while t <= 10_000.0 {
        engine.ingest_vehicle_frame(&traffic, t, 0);
        engine.step(t, noon());
        t += 1000.0;
    }
    assert!(!engine.get_status().actuator.degraded);
}

#[test]
fn test_orderly_shutdown_drains_then_releases() {
    let (engine, mut handle) = engine_with(Config::default());
    let traffic = frame(&[(Direction::South, 2)]);
    engine.ingest_vehicle_frame(&traffic, 0.0, 0);
    engine.step(0.0, noon());
    engine.step(1000.0, noon());
    assert_eq!(state(&engine, Direction::South), LightState::Green);

    let mut t = 1000.0;
    while !engine.drain_to_red(t) {
        assert_eq!(non_red(&engine), vec![Direction::South]);
        t += 500.0;
        assert!(t < 10_000.0, "drain never finished");
    }
    assert!(engine.get_status().all_red());
    // Decisions stay off after draining
    engine.step(t + 1000.0, noon());
    assert!(engine.get_status().all_red());

    engine.release_actuator().unwrap();
    assert!(handle.is_released());
    assert_eq!(handle.outputs()[Direction::South], ActuatorOutput::Off);
}

#[test]
fn test_event_log_keeps_newest_in_order() {
    let (engine, _handle) = engine_with(Config::default());
    let traffic = frame(&[(Direction::East, 2)]);
    for i in 0..5 {
        let t = i as f64 * 1000.0;
        engine.ingest_vehicle_frame(&traffic, t, i);
        engine.step(t, noon());
    }
    let events = engine.get_events(3);
    assert_eq!(events.len(), 3);
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    assert!(engine
        .get_events(100)
        .iter()
        .any(|e| e.category == EventCategory::Transition && e.direction == Some(Direction::East)));
}

#[test]
fn test_safety_invariant_under_random_commands() {
    use Direction::*;
    let layouts = vec![
        Config::default().conflict_groups,
        vec![vec![North, South], vec![East, West]],
    ];

    for (seed, groups) in layouts.into_iter().enumerate() {
        let mut config = Config::default();
        config.conflict_groups = groups.clone();
        config.tracker.max_stale_frames = 2;
        let (engine, _handle) = engine_with(config);
        let group_of = |d: Direction| groups.iter().position(|g| g.contains(&d));

        let mut rng = StdRng::seed_from_u64(0x5AFE + seed as u64);
        let mut t = 0.0;
        for frame_id in 0..3000u64 {
            t += rng.gen_range(50.0..1500.0);
            let dir = Direction::ALL[rng.gen_range(0..4)];
            match rng.gen_range(0..100) {
                0..=39 => {
                    let n: Vec<(Direction, usize)> = Direction::ALL
                        .iter()
                        .map(|d| (*d, rng.gen_range(0..6)))
                        .collect();
                    engine.ingest_vehicle_frame(&frame(&n), t, frame_id);
                }
                40..=69 => engine.step(t, noon()),
                70..=77 => {
                    let target = if rng.gen_bool(0.5) {
                        LightState::Green
                    } else {
                        LightState::Red
                    };
                    let _ = engine.set_manual(dir, target);
                }
                78..=85 => {
                    let modes = [ControllerMode::Auto, ControllerMode::Manual, ControllerMode::Simple];
                    let _ = engine.set_mode(modes[rng.gen_range(0..3)]);
                }
                86..=92 => {
                    let _ = engine.request_pedestrian(dir);
                }
                93..=95 => {
                    let _ = engine.emergency_stop();
                }
                _ => {
                    let _ = engine.clear_emergency(ControllerMode::Auto);
                }
            }

            let lit: Vec<Option<usize>> = non_red(&engine).into_iter().map(group_of).collect();
            assert!(
                lit.windows(2).all(|w| w[0] == w[1]),
                "seed {} step {}: two conflict groups lit {:?}",
                seed,
                frame_id,
                non_red(&engine)
            );
        }
        assert_eq!(engine.get_status().stats.safety_violations, 0);
    }
}

// ============================================================================
// DEGRADED INPUTS
// ============================================================================

fn detection_events(engine: &Engine) -> usize {
    engine
        .get_events(1000)
        .iter()
        .filter(|e| e.category == EventCategory::Detection)
        .count()
}

#[test]
fn test_silent_vehicle_camera_reads_as_zero() {
    let (engine, _handle) = engine_with(Config::default());
    engine.ingest_vehicle_frame(&frame(&[(Direction::North, 5)]), 0.0, 0);

    let mut t = 0.0;
    while t <= 5000.0 {
        engine.step(t, noon());
        t += 1000.0;
    }
    let status = engine.get_status();
    assert!(!status.detection_stale);
    assert_eq!(status.direction(Direction::North).unwrap().count, 5);

    // Ten minutes without a single frame
    while t <= 600_000.0 {
        engine.step(t, noon());
        t += 1000.0;
    }
    let status = engine.get_status();
    assert!(status.detection_stale);
    assert_eq!(status.direction(Direction::North).unwrap().count, 0);
    assert_eq!(detection_events(&engine), 1, "outage is reported once");

    // Next frame clears it; old tracks were dropped, so identities are fresh
    engine.ingest_vehicle_frame(&frame(&[(Direction::North, 5)]), t, 1);
    let status = engine.get_status();
    assert!(!status.detection_stale);
    assert_eq!(status.direction(Direction::North).unwrap().count, 5);
    assert_eq!(status.stats.tracks_created, 10);
    assert_eq!(detection_events(&engine), 2);
}

#[test]
fn test_gesture_streak_does_not_span_camera_silence() {
    let (engine, _handle) = engine_with(Config::default());
    let hand = raised_hand();
    let mut t = 0.0;
    while t <= 1500.0 {
        assert!(engine
            .ingest_gesture_frame(Some(&hand), FrameGeometry::UNIT, t)
            .request
            .is_none());
        t += 50.0;
    }

    // Camera drops out for 8 s, then the same hand is back in frame
    let mut t = 9500.0;
    let mut emitted_at = None;
    while t <= 12_000.0 {
        if engine
            .ingest_gesture_frame(Some(&hand), FrameGeometry::UNIT, t)
            .request
            .is_some()
        {
            emitted_at = Some(t);
            break;
        }
        t += 50.0;
    }
    assert_eq!(emitted_at, Some(11_500.0));
    assert_eq!(detection_events(&engine), 1);
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_decision_loop_with_live_producers() {
    let mut config = Config::default();
    config.engine.decision_period_ms = 50;
    config.timing.red_yellow_ms = 100.0;
    config.timing.yellow_ms = 200.0;
    let period = Duration::from_millis(50);
    let (engine, mut handle) = engine_with(config);
    let engine = Arc::new(engine);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(engine.clone().run(shutdown_rx));
    let producing = Arc::new(AtomicBool::new(true));

    let vehicles = {
        let engine = engine.clone();
        let producing = producing.clone();
        tokio::spawn(async move {
            let traffic = frame(&[(Direction::North, 3), (Direction::East, 1)]);
            let mut frame_id = 0;
            while producing.load(Ordering::SeqCst) {
                engine.ingest_vehicle_frame(&traffic, engine.elapsed_ms(), frame_id);
                frame_id += 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };
    let gestures = {
        let engine = engine.clone();
        let producing = producing.clone();
        tokio::spawn(async move {
            let hand = raised_hand();
            while producing.load(Ordering::SeqCst) {
                engine.ingest_gesture_frame(Some(&hand), FrameGeometry::UNIT, engine.elapsed_ms());
                tokio::time::sleep(Duration::from_millis(15)).await;
            }
        })
    };
    let watcher = {
        let engine = engine.clone();
        let producing = producing.clone();
        tokio::spawn(async move {
            let mut samples = 0u32;
            while producing.load(Ordering::SeqCst) {
                let status = engine.get_status();
                assert!(status.active_conflict_groups <= 1, "dual green: {:?}", non_red(&engine));
                let north = status.direction(Direction::North).unwrap().count;
                let east = status.direction(Direction::East).unwrap().count;
                // Counts are only ever published whole
                assert!(matches!((north, east), (0, 0) | (3, 1)), "torn counts {} {}", north, east);
                samples += 1;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            samples
        })
    };

    tokio::time::sleep(Duration::from_millis(600)).await;
    let status = engine.get_status();
    assert_eq!(status.active_direction, Some(Direction::North));
    assert_ne!(status.state(Direction::North), Some(LightState::Red));
    assert!(!status.detection_stale);

    engine.emergency_stop().unwrap();
    tokio::time::sleep(period).await;
    let status = engine.get_status();
    assert_eq!(status.mode, ControllerMode::Emergency);
    assert!(status.all_red());
    assert!(status.emergency_latched);

    engine.clear_emergency(ControllerMode::Auto).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    producing.store(false, Ordering::SeqCst);
    vehicles.await.unwrap();
    gestures.await.unwrap();
    assert!(watcher.await.unwrap() > 10);

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("decision loop did not stop")
        .unwrap();
    assert_eq!(result, Ok(()));

    assert!(engine.get_status().all_red());
    assert!(handle.is_released());
    let outputs = handle.outputs();
    assert!(Direction::ALL.iter().all(|d| outputs[*d] == ActuatorOutput::Off));
}

#[test]
fn test_racing_emergency_commands_leave_coherent_state() {
    for round in 0..20u64 {
        let (engine, _handle) = engine_with(Config::default());
        engine.ingest_vehicle_frame(&frame(&[(Direction::South, 2)]), 0.0, 0);

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..200 {
                    let _ = engine.emergency_stop();
                }
            });
            s.spawn(|| {
                for _ in 0..200 {
                    let _ = engine.clear_emergency(ControllerMode::Auto);
                }
            });
            s.spawn(|| {
                for i in 0..200 {
                    engine.step(i as f64 * 10.0, noon());
                }
            });
        });

        let status = engine.get_status();
        let in_emergency = status.mode == ControllerMode::Emergency;
        assert_eq!(status.emergency_latched, in_emergency, "round {}", round);
        assert_eq!(
            matches!(
                engine.request_pedestrian(Direction::West),
                Err(CommandError::EmergencyActive)
            ),
            in_emergency,
            "round {}",
            round
        );
        if in_emergency {
            engine.step(5000.0, noon());
            assert!(engine.get_status().all_red());
        }
    }
}
