//! Sonar Control - command routing and typed device control
//!
//! This crate provides both ends of the command path over a
//! [`sonar_core::ParameterStore`]:
//! - [`CommandRouter`]: device side, turns `set` batches into typed commands
//! - [`ControlFacade`]: client side, typed and verified writes plus sample events
//! - [`AsyncExecutor`]: runs facade commands off a cooperative event loop
//! - [`ServerWatchdog`] / [`ClientWatchdog`]: liveness in both directions

pub mod command;
pub mod controls;
pub mod data;
pub mod error;
pub mod executor;
pub mod facade;
pub mod router;
pub mod watchdog;

pub use command::{Command, OperationKind, SONAR_DEVICE};
pub use controls::{GeneratorControl, SensorControl, SonarControl, TvgControl};
pub use data::{AcousticSample, DataEvent, DataHandler, HandlerId, SensorSample};
pub use error::ControlError;
pub use executor::{
    ActionKind, AsyncExecutor, EventLoop, ExecutorEvent, ManualEventLoop, TimerCallback,
    TimerControl, TokioEventLoop,
};
pub use facade::{ControlFacade, Tolerance};
pub use router::{CommandHandler, CommandRouter, Operation, Rejected};
pub use watchdog::{ClientWatchdog, ServerWatchdog, WatchdogConfig, WatchdogEvent};
