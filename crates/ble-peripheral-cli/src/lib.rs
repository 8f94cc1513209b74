//! blep: advertise and scan BLE manufacturer data from the command line

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::{AppConfig, CliConfig};
pub use error::{CliError, Result};
