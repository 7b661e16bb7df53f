//! I/O backends for the feeder: a simulated machine and, with the `hardware`
//! feature on Linux, Raspberry Pi GPIO.
pub mod error;
pub mod sim;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;

pub use error::HwError;
pub use sim::{SimBuffer, SimMotor, SimSelector, SimSlot, SimulatedIo};

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use gpio::GpioIo;
