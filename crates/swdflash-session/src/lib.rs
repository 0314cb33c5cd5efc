//! Debug session layer
//!
//! This crate ties a debug probe to the NVM driver of whatever device sits
//! behind it. The CLI only talks to [`Session`]. It never picks a driver
//! itself and never touches controller registers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        CLI (bin/swdflash)                    │
//! │  - Only imports swdflash-session and swdflash-core           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  swdflash-session (this crate)               │
//! │  - Session: target + selected driver, monitor dispatch       │
//! │  - Registry: opens probes by name, probes driver families    │
//! │  - Image: block merge, erase-if-changed, unit programming    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │    swdflash-core         │   │  Driver crates           │
//! │  - Target trait          │   │  - stm32lx (registers)   │
//! │  - NvmDriver trait       │   │  - lpc546xx (boot ROM)   │
//! │  - Regions, commands     │   │                          │
//! └──────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use swdflash_session::{NoProgress, Session};
//!
//! let mut session = Session::open("sim:device=stm32l0")?;
//! session.write_image(0x0800_0000, &image, &mut NoProgress)?;
//! session.verify(0x0800_0000, &image)?;
//! ```

mod error;
mod handle;
mod image;
mod registry;

pub use error::{Result, SessionError};
pub use handle::{Session, GENERIC_COMMANDS};
pub use image::{NoProgress, WriteProgress, WriteStats};
pub use registry::{
    available_drivers, available_probes, open_target, parse_probe_params, probe_driver,
    probe_names_short, DriverInfo, ProbeInfo, ProbeParams,
};

// Re-export core types that the CLI needs
pub use swdflash_core::command::{CommandInfo, Console};
pub use swdflash_core::command::parse_number;
pub use swdflash_core::region::{NvmRegion, RegionKind};
