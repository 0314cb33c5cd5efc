//! Host capability surface
//!
//! Drivers never talk to a probe directly. Everything they need from the
//! debug host (memory peek/poke, sticky link error detection, a millisecond
//! clock, progress output and basic run control) is consumed through the
//! [`Target`] trait. The debug transport behind it is out of scope here.

use crate::error::Result;

/// Cortex-M core registers that drivers need to stage ROM calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreRegister {
    /// General purpose register r0..r12
    R(u8),
    /// Main stack pointer
    Msp,
    /// Link register
    Lr,
    /// Program counter
    Pc,
    /// Program status register
    Xpsr,
}

/// Thumb state bit of xPSR, must be set before resuming into Thumb code
pub const XPSR_THUMB: u32 = 1 << 24;

/// Application Interrupt and Reset Control Register
pub const CORTEXM_AIRCR: u32 = 0xe000_ed0c;
/// AIRCR write key plus SYSRESETREQ
pub const CORTEXM_AIRCR_SYSRESETREQ: u32 = 0x05fa_0004;

/// Services a debug host provides to NVM drivers
///
/// Memory accessors fail with [`Error::Transport`](crate::Error::Transport)
/// when the link reports a fault. Because writes over the link may be
/// posted, a fault can also surface later through [`Target::check_error`],
/// which latches until read.
pub trait Target {
    /// Read a 32-bit word from target memory
    fn read32(&mut self, addr: u32) -> Result<u32>;

    /// Read a 16-bit half-word from target memory
    fn read16(&mut self, addr: u32) -> Result<u16>;

    /// Read a block of target memory
    fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Write a 32-bit word to target memory
    fn write32(&mut self, addr: u32, value: u32) -> Result<()>;

    /// Write a 16-bit half-word to target memory
    fn write16(&mut self, addr: u32, value: u16) -> Result<()>;

    /// Write a single byte to target memory
    fn write8(&mut self, addr: u32, value: u8) -> Result<()>;

    /// Write a block of target memory in one burst
    fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Check (and clear) the sticky link error flag
    fn check_error(&mut self) -> bool;

    /// Monotonic host clock in milliseconds
    fn time_ms(&self) -> u64;

    /// Emit one progress indication on the user console
    fn print_progress(&mut self) {}

    /// Write a core register of the halted processor
    fn write_core_reg(&mut self, reg: CoreRegister, value: u32) -> Result<()>;

    /// Read a core register of the halted processor
    fn read_core_reg(&mut self, reg: CoreRegister) -> Result<u32>;

    /// Resume the processor, optionally for a single instruction
    fn halt_resume(&mut self, step: bool) -> Result<()>;

    /// Poll whether the processor has halted again
    fn halt_poll(&mut self) -> Result<bool>;

    /// Reset the target (system reset, debug stays attached)
    fn reset(&mut self) -> Result<()>;

    /// Generic processor attach (halts the core)
    fn attach(&mut self) -> Result<()>;

    /// Generic processor detach (resumes the core)
    fn detach(&mut self);
}

/// Progress deadline
///
/// A deadline never aborts an operation. It only rate-limits progress
/// output: [`Deadline::tick`] emits at most one progress mark per period
/// and re-arms itself.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started_ms: u64,
    period_ms: u32,
}

impl Deadline {
    /// Arm a deadline `period_ms` from now
    pub fn start<T: Target + ?Sized>(target: &T, period_ms: u32) -> Self {
        Self {
            started_ms: target.time_ms(),
            period_ms,
        }
    }

    /// Whether the period has elapsed
    pub fn expired<T: Target + ?Sized>(&self, target: &T) -> bool {
        target.time_ms().saturating_sub(self.started_ms) >= self.period_ms as u64
    }

    /// Emit a progress mark if the period elapsed, then re-arm
    pub fn tick<T: Target + ?Sized>(&mut self, target: &mut T) {
        if self.expired(target) {
            target.print_progress();
            self.started_ms = target.time_ms();
        }
    }
}
