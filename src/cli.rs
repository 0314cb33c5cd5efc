//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    swdflash_session::parse_number(s).ok_or_else(|| format!("Invalid number: {}", s))
}

/// Generate dynamic help text for the probe argument
fn probe_help() -> String {
    format!(
        "Debug probe to use, as name[:key=value,...] [available: {}]",
        swdflash_session::probe_names_short()
    )
}

#[derive(Parser)]
#[command(name = "swdflash")]
#[command(author, version, about = "Debug-link NVM programmer for STM32L0/L1 and LPC546xx", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Identify the attached device
    Probe {
        /// Debug probe to use
        #[arg(short, long, default_value = "sim", help = probe_help())]
        probe: String,
    },

    /// Show the device's NVM regions and monitor commands
    Info {
        /// Debug probe to use
        #[arg(short, long, default_value = "sim", help = probe_help())]
        probe: String,
    },

    /// Erase a range, widened to whole erase blocks
    Erase {
        /// Debug probe to use
        #[arg(short, long, default_value = "sim", help = probe_help())]
        probe: String,

        /// Start address (hex, e.g., 0x08000000)
        #[arg(long, value_parser = parse_hex_u32)]
        start: u32,

        /// Length of the range (hex or decimal)
        #[arg(long, value_parser = parse_hex_u32)]
        length: u32,
    },

    /// Program a binary image
    Write {
        /// Debug probe to use
        #[arg(short, long, default_value = "sim", help = probe_help())]
        probe: String,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Load address (hex or decimal)
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: u32,

        /// Verify after writing
        #[arg(long, default_value = "true")]
        verify: bool,
    },

    /// Read target memory to a file
    Read {
        /// Debug probe to use
        #[arg(short, long, default_value = "sim", help = probe_help())]
        probe: String,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Start address (hex or decimal)
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes to read (hex or decimal)
        #[arg(short, long, value_parser = parse_hex_u32)]
        length: u32,
    },

    /// Erase every NVM region, recovering a read protected device
    MassErase {
        /// Debug probe to use
        #[arg(short, long, default_value = "sim", help = probe_help())]
        probe: String,
    },

    /// Run a monitor command (e.g. "option show", "erase_sector 3")
    Monitor {
        /// Debug probe to use
        #[arg(short, long, default_value = "sim", help = probe_help())]
        probe: String,

        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// List supported probes and driver families
    ListDrivers,
}
