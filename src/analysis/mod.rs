// src/analysis/mod.rs
//
// Perception side of the engine.
//
// Signal flow:
//   Vehicle-camera detections → vehicle_tracker → per-direction counts
//   Handheld-camera detections → gesture_detector → crossing requests

pub mod gesture_detector;
pub mod vehicle_tracker;

pub use gesture_detector::{
    GestureConfig, GestureDetector, GestureDirectionMode, GestureGate, GestureStatus,
    GestureUpdate,
};
pub use vehicle_tracker::{CountSnapshot, Track, TrackerConfig, VehicleTracker};
