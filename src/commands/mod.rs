//! CLI command implementations
//!
//! Every command works on a [`swdflash_session::Session`], so the same code
//! drives register-sequenced and boot-ROM devices alike.

mod erase;
mod list;
mod monitor;
mod probe;
mod read;
mod write;

pub use erase::{run_erase, run_mass_erase};
pub use list::list_drivers;
pub use monitor::run_monitor;
pub use probe::{run_info, run_probe};
pub use read::run_read;
pub use write::run_write;
