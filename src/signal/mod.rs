// src/signal/mod.rs
//
// Signal heads and the physical output behind them.

pub mod actuator;
pub mod light_bank;
pub mod light_fsm;

pub use actuator::{
    ActuatorConfig, ActuatorSink, LoggingActuator, SimulatedActuator, SimulatedActuatorHandle,
};
pub use light_bank::{ActuatorHealth, BankNotice, ConflictGroups, LightBank, LightView};
pub use light_fsm::{LightFsm, TimingConfig, TransitionKind, TransitionRecord};
