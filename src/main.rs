// src/main.rs
//
// Demo runner: engine + logging actuator + a synthetic vehicle camera.
// Ctrl-C drains every head to RED and releases the actuator.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use traffic_signal_engine::signal::LoggingActuator;
use traffic_signal_engine::types::{BBox, Detection, Direction, ObjectClass};
use traffic_signal_engine::{Config, Engine};

const FRAME_INTERVAL_MS: u64 = 100;
const STATUS_INTERVAL_SECS: u64 = 5;

/// Deterministic traffic pattern: each approach swells and drains on its
/// own period so the scheduler has something to rotate on.
fn synthetic_frame(t_ms: f64) -> Vec<Detection> {
    let t = t_ms / 1000.0;
    let mut detections = Vec::new();
    for dir in Direction::ALL {
        let period = 40.0 + 15.0 * dir.index() as f64;
        let phase = (t / period * std::f64::consts::TAU).sin();
        let count = ((phase + 1.0) * 3.0).round() as usize;
        for i in 0..count {
            let slot = i as f32 * 0.08;
            let (cx, cy) = match dir {
                Direction::North => (0.3 + slot, 0.12),
                Direction::East => (0.6 + slot * 0.5, 0.5),
                Direction::South => (0.3 + slot, 0.88),
                Direction::West => (0.1 + slot * 0.5, 0.5),
            };
            detections.push(Detection::new(
                ObjectClass::Car,
                0.85,
                BBox::new(cx - 0.03, cy - 0.03, cx + 0.03, cy + 0.03),
            ));
        }
    }
    detections
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = if Path::new(&config_path).exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚦 Traffic Signal Engine Starting");
    if Path::new(&config_path).exists() {
        info!("✓ Configuration loaded from {}", config_path);
    } else {
        warn!("⚠️  {} not found, running on defaults", config_path);
    }

    let actuator = Box::new(LoggingActuator::new("demo-heads"));
    let engine = Arc::new(Engine::new(config, actuator).context("building engine")?);
    info!("✓ Engine ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Vehicle camera
    let producer = {
        let engine = engine.clone();
        let mut stop = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_INTERVAL_MS));
            let mut frame_id: u64 = 0;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = engine.elapsed_ms();
                        engine.ingest_vehicle_frame(&synthetic_frame(now), now, frame_id);
                        frame_id += 1;
                    }
                    _ = stop.changed() => break,
                }
            }
        })
    };

    // Status printer
    let reporter = {
        let engine = engine.clone();
        let mut stop = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match engine.get_status().to_json() {
                            Ok(json) => println!("{}", json),
                            Err(e) => warn!("Could not serialize status: {}", e),
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
        })
    };

    let runner = tokio::spawn(engine.clone().run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("🛑 Ctrl-C received");
    shutdown_tx
        .send(true)
        .context("signalling shutdown")?;

    let _ = producer.await;
    let _ = reporter.await;
    match runner.await.context("joining decision loop")? {
        Ok(()) => info!("✓ Shutdown complete"),
        Err(e) => error!("Actuator release failed: {}", e),
    }

    let summary = engine.metrics().summary();
    info!("\n========================================");
    info!("  Decisions: {}", summary.decisions);
    info!("  Transitions: {}", summary.transitions);
    info!("  Pedestrian phases: {}", summary.pedestrian_served);
    info!("  Safety violations: {}", summary.safety_violations);
    info!("========================================");

    Ok(())
}
