//! NVM driver capability trait
//!
//! The host dispatches every flash operation through [`NvmDriver`]. Each
//! supported device family provides one implementation, selected once at
//! probe time. Mass erase, attach and detach are optional: the defaults
//! fall back to "unsupported" and the generic processor attach/detach.

use alloc::vec::Vec;

use crate::command::{CommandInfo, Console};
use crate::error::{Error, Result};
use crate::region::NvmRegion;
use crate::target::Target;

/// Capability set of a probed device family
pub trait NvmDriver {
    /// Human readable identity, composed at probe time
    fn variant(&self) -> &str;

    /// Ordered list of NVM regions owned by the target
    fn regions(&self) -> &[NvmRegion];

    /// Erase `len` bytes starting at `addr` in region `region`
    ///
    /// The range must be aligned to the region's block size by the caller.
    fn erase(&mut self, target: &mut dyn Target, region: usize, addr: u32, len: u32)
        -> Result<()>;

    /// Program `data` at `addr` in region `region` (already erased)
    fn write(&mut self, target: &mut dyn Target, region: usize, addr: u32, data: &[u8])
        -> Result<()>;

    /// Erase every NVM region of the device
    fn mass_erase(&mut self, _target: &mut dyn Target) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Attach to the device
    fn attach(&mut self, target: &mut dyn Target) -> Result<()> {
        target.attach()
    }

    /// Detach from the device
    fn detach(&mut self, target: &mut dyn Target) {
        target.detach()
    }

    /// Names and help texts of the family's monitor commands
    fn commands(&self) -> Vec<CommandInfo> {
        Vec::new()
    }

    /// Run a monitor command, `None` if the family has no such command
    fn run_command(
        &mut self,
        _target: &mut dyn Target,
        _console: &mut dyn Console,
        _argv: &[&str],
    ) -> Option<bool> {
        None
    }

    /// Look up a region by index
    fn region(&self, index: usize) -> Result<NvmRegion> {
        self.regions().get(index).copied().ok_or(Error::NoRegion)
    }
}
