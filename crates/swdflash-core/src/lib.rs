//! swdflash-core - Core library for debug-link NVM programming
//!
//! This crate provides the pieces shared by every NVM driver: the host
//! capability surface a driver talks to ([`target::Target`]), the
//! busy/error poller, the deadline/progress primitive, the region
//! descriptor, the driver capability trait and the monitor command table.
//!
//! All target access is "peek/poke" of the target address space over the
//! debug link. Nothing in this crate executes code on the target by itself.
//!
//! # Features
//!
//! - `std` - Enable standard library support (includes `alloc`)
//! - `alloc` - Enable heap allocation (owned variant labels, region lists)
//!
//! # Example
//!
//! ```ignore
//! use swdflash_core::driver::NvmDriver;
//!
//! fn erase_everything(driver: &mut dyn NvmDriver, target: &mut dyn Target) -> Result<()> {
//!     for index in 0..driver.regions().len() {
//!         let region = driver.regions()[index];
//!         driver.erase(target, index, region.start, region.length)?;
//!     }
//!     Ok(())
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod command;
#[cfg(feature = "alloc")]
pub mod driver;
pub mod error;
pub mod poll;
pub mod region;
pub mod target;

pub use error::{Error, Result};
