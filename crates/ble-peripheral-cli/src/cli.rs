//! Command-line interface definitions and parsing

use ble_peripheral_core::Uuid;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Use an in-process simulated radio instead of the OS stack
    #[arg(long, global = true)]
    pub simulate: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Advertise manufacturer-specific data
    Advertise {
        /// Company identifier, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_company_id)]
        company_id: Option<u16>,
        /// Payload bytes as hex
        #[arg(short, long)]
        data: Option<String>,
        /// Local name to advertise
        #[arg(long)]
        name: Option<String>,
        /// 128-bit service UUID to advertise
        #[arg(long)]
        service_uuid: Option<Uuid>,
        /// Include the radio's TX power level
        #[arg(long)]
        tx_power: bool,
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Print advertisements seen by the radio
    Scan {
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
        /// One JSON record per line
        #[arg(long)]
        json: bool,
    },
    /// Show radio and peripheral status
    Status,
}

/// Parse a company identifier given as decimal or `0x`-prefixed hex
pub fn parse_company_id(value: &str) -> Result<u16, String> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid company id '{}': {}", value, e))
}
