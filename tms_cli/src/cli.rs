//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "tms", version, about = "Filament transport controller CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/tms_config.toml")]
    pub config: PathBuf,

    /// Print results and errors as JSON instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Feed a slot's filament through the selector to the loaded position
    Load {
        #[arg(long)]
        slot: usize,
    },
    /// Retract a loaded slot back behind its presence sensor
    Unload {
        #[arg(long)]
        slot: usize,
    },
    /// Load then unload a slot (mechanical check)
    Cycle {
        #[arg(long)]
        slot: usize,
    },
    /// Clear a slot's latched error and return it to idle
    Reset {
        #[arg(long)]
        slot: usize,
    },
    /// Print the state of every slot, the selector and the buffer
    Status,
    /// Keep regulating the buffer for a while, optionally loading a slot first
    Serve {
        /// How long to run (seconds)
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        /// Slot to load before serving
        #[arg(long)]
        slot: Option<usize>,
    },
    /// Quick health check (I/O backend opens, sensors read)
    SelfCheck,
}
