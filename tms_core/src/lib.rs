#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Filament transport controller (hardware-agnostic).
//!
//! All hardware interaction goes through `tms_traits::DigitalIo`; time goes
//! through `tms_traits::Clock`.
//!
//! ## Architecture
//!
//! - **Debouncing**: per-line time-window debouncer (`debounce`)
//! - **Motion**: bounded, incremental stepping of one motor (`motion`)
//! - **Selector**: exclusive ownership of the shared path (`gate`)
//! - **Slots**: per-slot load/unload state machine (`slot`)
//! - **Buffer**: background tension regulation (`buffer`)
//! - **Controller**: host commands and the cooperative tick (`controller`)
//!
//! Nothing blocks beyond one bounded pulse burst; the `runner` module turns
//! the tick loop into blocking load/unload calls for simple hosts.

pub mod buffer;
pub mod builder;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod debounce;
pub mod error;
pub mod gate;
pub mod hw_error;
pub mod mocks;
pub mod motion;
pub mod runner;
pub mod slot;
pub mod status;
pub mod util;

pub use buffer::{BufferRegulator, BufferState};
pub use builder::{ControllerBuilder, Missing, Set, build_controller};
pub use config::{
    BufferCfg, ControlCfg, Level, MachineCfg, MotionCfg, MotorCfg, SelectorCfg, SensorCfg, SlotCfg,
};
pub use controller::{Controller, ControllerCore};
pub use debounce::{DebouncedSensor, Debouncer};
pub use error::{BuildError, ErrorKind, Report, Result, TmsError};
pub use gate::{Acquire, GateState, SelectorGate};
pub use motion::{Direction, MotionDriver, MotionRequest, Move, Progress};
pub use runner::{
    RunParams, load_blocking, run_until, run_until_settled, service_for, unload_blocking,
};
pub use slot::SlotController;
pub use status::{Activity, SlotState, SlotStatus, Status};
