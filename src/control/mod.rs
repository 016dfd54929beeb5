// src/control/mod.rs

pub mod controller;
pub mod pedestrian;
pub mod scheduler;

pub use controller::{Controller, ControllerConfig, LightCommand, SimpleConfig};
pub use pedestrian::{PedestrianConfig, PedestrianQueue};
pub use scheduler::{SchedulerConfig, TimeOfDayConfig};
