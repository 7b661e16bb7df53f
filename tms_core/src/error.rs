use thiserror::Error;

/// Errors raised by the transport controller.
///
/// Every variant is local to the component that raised it; the component
/// has already disabled the motors it was driving when the error surfaces.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TmsError {
    #[error("slot {slot}: presence sensor not reached within {travelled_mm:.1} mm")]
    LoadTimeout { slot: usize, travelled_mm: f32 },
    #[error("slot {slot}: jam ({reason})")]
    Jam { slot: usize, reason: String },
    #[error("selector busy: slot {requested} requested, slot {owner} holds it")]
    GateBusy { requested: usize, owner: usize },
    #[error("slot {slot}: buffer not tensioned after {fed_mm:.1} mm")]
    BufferStarvation { slot: usize, fed_mm: f32 },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("slot {slot}: no filament at the slot entry")]
    NoFilament { slot: usize },
    #[error("slot {slot}: command not accepted while {state}")]
    InvalidState { slot: usize, state: &'static str },
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("sequence did not settle within {ticks} ticks")]
    Stalled { ticks: u64 },
    #[error("halted by host")]
    Halted,
}

/// Field-less error classification reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    LoadTimeout,
    Jam,
    GateBusy,
    BufferStarvation,
    Config,
    InvariantViolation,
    NoFilament,
    InvalidState,
    Hardware,
    Stalled,
    Halted,
}

impl ErrorKind {
    /// Stable numeric code for the host protocol.
    pub fn code(self) -> u8 {
        match self {
            Self::LoadTimeout => 1,
            Self::Jam => 2,
            Self::GateBusy => 3,
            Self::BufferStarvation => 4,
            Self::Config => 5,
            Self::InvariantViolation => 6,
            Self::NoFilament => 7,
            Self::InvalidState => 8,
            Self::Hardware => 9,
            Self::Stalled => 10,
            Self::Halted => 11,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::LoadTimeout => "LoadTimeout",
            Self::Jam => "Jam",
            Self::GateBusy => "GateBusy",
            Self::BufferStarvation => "BufferStarvation",
            Self::Config => "Config",
            Self::InvariantViolation => "InvariantViolation",
            Self::NoFilament => "NoFilament",
            Self::InvalidState => "InvalidState",
            Self::Hardware => "Hardware",
            Self::Stalled => "Stalled",
            Self::Halted => "Halted",
        }
    }
}

impl TmsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LoadTimeout { .. } => ErrorKind::LoadTimeout,
            Self::Jam { .. } => ErrorKind::Jam,
            Self::GateBusy { .. } => ErrorKind::GateBusy,
            Self::BufferStarvation { .. } => ErrorKind::BufferStarvation,
            Self::Config(_) => ErrorKind::Config,
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
            Self::NoFilament { .. } => ErrorKind::NoFilament,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Hardware(_) => ErrorKind::Hardware,
            Self::Stalled { .. } => ErrorKind::Stalled,
            Self::Halted => ErrorKind::Halted,
        }
    }

    /// Whether a slot failing with this error goes back to `Idle` instead of
    /// latching `Error`.
    pub fn returns_to_idle(&self) -> bool {
        matches!(
            self,
            Self::LoadTimeout { .. } | Self::NoFilament { .. } | Self::GateBusy { .. }
        )
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing digital I/O backend")]
    MissingIo,
    #[error("missing machine configuration")]
    MissingMachine,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T, E = TmsError> = std::result::Result<T, E>;
pub use eyre::Report;
