//! swdflash - debug-link NVM programmer
//!
//! Programs the on-chip flash and data EEPROM of STM32L0/L1 and LPC546xx
//! microcontrollers through a debug probe.
//!
//! # Architecture
//!
//! Two driver strategies sit behind one `Session` abstraction:
//! - **Register-sequenced** (STM32L0/L1) - the host unlocks the NVM
//!   controller, writes words and polls its status register
//! - **Boot-ROM calls** (LPC546xx) - the host stages a call frame in target
//!   RAM and lets the core run the vendor's IAP routines
//!
//! This allows the same commands (read, write, erase, monitor) to work
//! regardless of which family is attached.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use swdflash_session::Session;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    match cli.command {
        Commands::Probe { probe } => {
            let session = Session::open(&probe)?;
            commands::run_probe(&session);
            Ok(())
        }
        Commands::Info { probe } => {
            let session = Session::open(&probe)?;
            commands::run_info(&session);
            Ok(())
        }
        Commands::Erase {
            probe,
            start,
            length,
        } => {
            let mut session = Session::open(&probe)?;
            commands::run_erase(&mut session, start, length)
        }
        Commands::Write {
            probe,
            input,
            address,
            verify,
        } => {
            let mut session = Session::open(&probe)?;
            commands::run_write(&mut session, &input, address, verify)
        }
        Commands::Read {
            probe,
            output,
            address,
            length,
        } => {
            let mut session = Session::open(&probe)?;
            commands::run_read(&mut session, &output, address, length)
        }
        Commands::MassErase { probe } => {
            let mut session = Session::open(&probe)?;
            commands::run_mass_erase(&mut session)
        }
        Commands::Monitor { probe, args } => {
            let mut session = Session::open(&probe)?;
            commands::run_monitor(&mut session, &args)
        }
        Commands::ListDrivers => {
            commands::list_drivers();
            Ok(())
        }
    }
}
