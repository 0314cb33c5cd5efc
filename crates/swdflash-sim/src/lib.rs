//! swdflash-sim - Emulated debug targets for testing
//!
//! This crate provides a [`Target`] implementation backed by an in-memory
//! model of a microcontroller. It is useful for testing the NVM drivers and
//! the command line front end without a debug probe or real hardware.
//!
//! A [`SimTarget`] owns the plain memory map and the core state, and hands
//! every access to a [`Device`] model first. The device claims the addresses
//! it emulates (controller registers, NVM arrays, watchdog) and leaves the
//! rest to plain memory. Every access is recorded in a trace so tests can
//! assert on the exact register sequence a driver issued.

use std::collections::HashMap;

use swdflash_core::error::{Error, Result};
use swdflash_core::target::{CoreRegister, Target};

pub mod config;
pub mod lpc546xx;
pub mod stm32lx;

pub use config::{SimConfig, SimConfigError};
pub use lpc546xx::{Lpc546xxConfig, Lpc546xxDevice};
pub use stm32lx::{SimFamily, Stm32lxConfig, Stm32lxDevice};

/// One recorded target access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Single read of `width` bytes
    Read { addr: u32, width: u8 },
    /// Single write of `width` bytes
    Write { addr: u32, value: u32, width: u8 },
    /// Block read
    ReadBlock { addr: u32, len: usize },
    /// Block write
    WriteBlock { addr: u32, len: usize },
    /// Core register write
    CoreReg { reg: CoreRegister, value: u32 },
    /// Resume (or single step) of the core
    Resume { step: bool },
    /// System reset
    Reset,
}

/// Plain memory areas of the emulated address space
///
/// Accesses outside every mapped area fail like a bus fault would.
#[derive(Debug, Default)]
pub struct Memory {
    areas: Vec<Area>,
}

#[derive(Debug)]
struct Area {
    start: u32,
    data: Vec<u8>,
}

impl Memory {
    /// Map `len` bytes at `start`, filled with `fill`
    pub fn map(&mut self, start: u32, len: u32, fill: u8) {
        self.areas.push(Area {
            start,
            data: vec![fill; len as usize],
        });
    }

    fn locate(&self, addr: u32, len: usize) -> Option<(usize, usize)> {
        self.areas.iter().enumerate().find_map(|(index, area)| {
            let offset = addr.checked_sub(area.start)? as usize;
            (offset + len <= area.data.len()).then_some((index, offset))
        })
    }

    /// Whether `[addr, addr + len)` is mapped
    pub fn is_mapped(&self, addr: u32, len: usize) -> bool {
        self.locate(addr, len).is_some()
    }

    /// Borrow a mapped range
    pub fn slice(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let (index, offset) = self.locate(addr, len)?;
        Some(&self.areas[index].data[offset..offset + len])
    }

    /// Mutably borrow a mapped range
    pub fn slice_mut(&mut self, addr: u32, len: usize) -> Option<&mut [u8]> {
        let (index, offset) = self.locate(addr, len)?;
        Some(&mut self.areas[index].data[offset..offset + len])
    }

    /// Copy a mapped range into `buf`
    pub fn read(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let src = self.slice(addr, buf.len()).ok_or(Error::Transport)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    /// Copy `data` into a mapped range
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let dst = self.slice_mut(addr, data.len()).ok_or(Error::Transport)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    /// Read a little-endian value of `width` bytes
    pub fn read_le(&self, addr: u32, width: u8) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf[..width as usize])?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Write the low `width` bytes of `value`, little-endian
    pub fn write_le(&mut self, addr: u32, value: u32, width: u8) -> Result<()> {
        self.write(addr, &value.to_le_bytes()[..width as usize])
    }

    /// Read a little-endian word
    pub fn read32(&self, addr: u32) -> Result<u32> {
        self.read_le(addr, 4)
    }

    /// Write a little-endian word
    pub fn write32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.write_le(addr, value, 4)
    }

    /// Set a mapped range to `value`
    pub fn fill(&mut self, addr: u32, len: u32, value: u8) {
        if let Some(dst) = self.slice_mut(addr, len as usize) {
            dst.fill(value);
        }
    }
}

/// Processor state visible to the debugger
#[derive(Debug, Default)]
pub struct Core {
    /// Core register file
    pub regs: HashMap<CoreRegister, u32>,
    /// Whether the core is halted
    pub halted: bool,
    /// Whether the debugger is attached
    pub attached: bool,
}

impl Core {
    /// Read a core register, unset registers read as zero
    pub fn reg(&self, reg: CoreRegister) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }
}

/// Behaviour of an emulated device
///
/// The access hooks return `None` for addresses the model does not claim,
/// which are then served from plain [`Memory`].
pub trait Device {
    /// Handle a read of `width` bytes
    fn read(&mut self, mem: &mut Memory, addr: u32, width: u8) -> Option<Result<u32>>;

    /// Handle a write of `width` bytes
    fn write(&mut self, mem: &mut Memory, addr: u32, value: u32, width: u8)
        -> Option<Result<()>>;

    /// Handle a block read
    fn read_block(&mut self, _mem: &mut Memory, _addr: u32, _buf: &mut [u8]) -> Option<Result<()>> {
        None
    }

    /// Handle a block write
    fn write_block(&mut self, _mem: &mut Memory, _addr: u32, _data: &[u8]) -> Option<Result<()>> {
        None
    }

    /// The core was resumed: run until the model decides it halts
    fn resume(&mut self, _mem: &mut Memory, core: &mut Core) {
        core.halted = false;
    }

    /// The debugger polled for halt while the core was running
    fn poll(&mut self, _mem: &mut Memory, _core: &mut Core) {}

    /// System reset
    fn reset(&mut self, _mem: &mut Memory, _core: &mut Core) {}

    /// Whether the last access made the device drop off the debug link
    fn take_link_drop(&mut self) -> bool {
        false
    }
}

/// Target backed by an emulated device
pub struct SimTarget<D: Device> {
    /// Device model
    pub device: D,
    /// Plain memory map
    pub memory: Memory,
    /// Core state
    pub core: Core,
    trace: Vec<Access>,
    clock_ms: u64,
    link_error: bool,
    link_down: bool,
    fail_after: Option<usize>,
    glitch: bool,
    progress: usize,
}

impl<D: Device> SimTarget<D> {
    /// Wrap a device model and its memory map
    pub fn new(device: D, memory: Memory) -> Self {
        Self {
            device,
            memory,
            core: Core {
                halted: true,
                ..Core::default()
            },
            trace: Vec::new(),
            clock_ms: 0,
            link_error: false,
            link_down: false,
            fail_after: None,
            glitch: false,
            progress: 0,
        }
    }

    /// Every access issued so far
    pub fn trace(&self) -> &[Access] {
        &self.trace
    }

    /// Forget the recorded accesses
    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }

    /// Number of progress marks emitted
    pub fn progress_marks(&self) -> usize {
        self.progress
    }

    /// Drop the link after `accesses` more successful accesses
    pub fn fail_after(&mut self, accesses: usize) {
        self.fail_after = Some(accesses);
        self.glitch = false;
    }

    /// Fail the single access that follows `accesses` successful ones
    ///
    /// The link stays up: later accesses go through again.
    pub fn glitch_after(&mut self, accesses: usize) {
        self.fail_after = Some(accesses);
        self.glitch = true;
    }

    /// Whether the link is currently down
    pub fn link_down(&self) -> bool {
        self.link_down
    }

    /// Bring a dropped link back up
    pub fn reconnect(&mut self) {
        self.link_down = false;
        self.link_error = false;
        self.fail_after = None;
        self.glitch = false;
    }

    fn access(&mut self, access: Access) -> Result<()> {
        self.clock_ms += 1;
        if let Some(remaining) = self.fail_after.as_mut() {
            if *remaining == 0 {
                self.fail_after = None;
                if std::mem::take(&mut self.glitch) {
                    log::debug!("sim: transient fault at {:?}", access);
                    self.link_error = true;
                    return Err(Error::Transport);
                }
                log::debug!("sim: link dropped at {:?}", access);
                self.link_down = true;
            } else {
                *remaining -= 1;
            }
        }
        if self.link_down {
            self.link_error = true;
            return Err(Error::Transport);
        }
        self.trace.push(access);
        Ok(())
    }

    fn after_access<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.link_error = true;
        }
        if self.device.take_link_drop() {
            log::debug!("sim: device left the debug link");
            self.link_down = true;
        }
        result
    }

    fn read(&mut self, addr: u32, width: u8) -> Result<u32> {
        self.access(Access::Read { addr, width })?;
        let result = match self.device.read(&mut self.memory, addr, width) {
            Some(result) => result,
            None => self.memory.read_le(addr, width),
        };
        self.after_access(result)
    }

    fn write(&mut self, addr: u32, value: u32, width: u8) -> Result<()> {
        self.access(Access::Write { addr, value, width })?;
        let result = match self.device.write(&mut self.memory, addr, value, width) {
            Some(result) => result,
            None => self.memory.write_le(addr, value, width),
        };
        self.after_access(result)
    }

    /// Count writes of `value` to `addr`
    pub fn count_writes(&self, addr: u32, value: u32) -> usize {
        self.trace
            .iter()
            .filter(|a| matches!(a, Access::Write { addr: at, value: v, .. } if *at == addr && *v == value))
            .count()
    }

    /// Count reads of `addr`
    pub fn count_reads(&self, addr: u32) -> usize {
        self.trace
            .iter()
            .filter(|a| matches!(a, Access::Read { addr: at, .. } if *at == addr))
            .count()
    }

    /// Whether any write landed in `[start, end)`
    pub fn wrote_in(&self, start: u32, end: u32) -> bool {
        self.trace.iter().any(|a| match *a {
            Access::Write { addr, .. } | Access::WriteBlock { addr, .. } => {
                addr >= start && addr < end
            }
            _ => false,
        })
    }
}

impl<D: Device> Target for SimTarget<D> {
    fn read32(&mut self, addr: u32) -> Result<u32> {
        self.read(addr, 4)
    }

    fn read16(&mut self, addr: u32) -> Result<u16> {
        Ok(self.read(addr, 2)? as u16)
    }

    fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.access(Access::ReadBlock {
            addr,
            len: buf.len(),
        })?;
        let result = match self.device.read_block(&mut self.memory, addr, buf) {
            Some(result) => result,
            None => self.memory.read(addr, buf),
        };
        self.after_access(result)
    }

    fn write32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.write(addr, value, 4)
    }

    fn write16(&mut self, addr: u32, value: u16) -> Result<()> {
        self.write(addr, value as u32, 2)
    }

    fn write8(&mut self, addr: u32, value: u8) -> Result<()> {
        self.write(addr, value as u32, 1)
    }

    fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.access(Access::WriteBlock {
            addr,
            len: data.len(),
        })?;
        let result = match self.device.write_block(&mut self.memory, addr, data) {
            Some(result) => result,
            None => self.memory.write(addr, data),
        };
        self.after_access(result)
    }

    fn check_error(&mut self) -> bool {
        std::mem::take(&mut self.link_error)
    }

    fn time_ms(&self) -> u64 {
        self.clock_ms
    }

    fn print_progress(&mut self) {
        self.progress += 1;
    }

    fn write_core_reg(&mut self, reg: CoreRegister, value: u32) -> Result<()> {
        self.access(Access::CoreReg { reg, value })?;
        self.core.regs.insert(reg, value);
        Ok(())
    }

    fn read_core_reg(&mut self, reg: CoreRegister) -> Result<u32> {
        self.clock_ms += 1;
        if self.link_down {
            self.link_error = true;
            return Err(Error::Transport);
        }
        Ok(self.core.reg(reg))
    }

    fn halt_resume(&mut self, step: bool) -> Result<()> {
        self.access(Access::Resume { step })?;
        if step {
            self.core.halted = true;
        } else {
            self.device.resume(&mut self.memory, &mut self.core);
        }
        Ok(())
    }

    fn halt_poll(&mut self) -> Result<bool> {
        self.clock_ms += 1;
        if self.link_down {
            self.link_error = true;
            return Err(Error::Transport);
        }
        if !self.core.halted {
            self.device.poll(&mut self.memory, &mut self.core);
        }
        Ok(self.core.halted)
    }

    fn reset(&mut self) -> Result<()> {
        self.access(Access::Reset)?;
        self.device.reset(&mut self.memory, &mut self.core);
        Ok(())
    }

    fn attach(&mut self) -> Result<()> {
        if self.link_down {
            return Err(Error::Transport);
        }
        self.core.attached = true;
        self.core.halted = true;
        Ok(())
    }

    fn detach(&mut self) {
        self.core.attached = false;
        self.core.halted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;

    impl Device for Plain {
        fn read(&mut self, _mem: &mut Memory, _addr: u32, _width: u8) -> Option<Result<u32>> {
            None
        }
        fn write(
            &mut self,
            _mem: &mut Memory,
            _addr: u32,
            _value: u32,
            _width: u8,
        ) -> Option<Result<()>> {
            None
        }
    }

    fn target() -> SimTarget<Plain> {
        let mut memory = Memory::default();
        memory.map(0x2000_0000, 0x100, 0);
        SimTarget::new(Plain, memory)
    }

    #[test]
    fn test_plain_memory_access() {
        let mut target = target();
        target.write32(0x2000_0010, 0xdead_beef).unwrap();
        target.write8(0x2000_0010, 0x01).unwrap();
        assert_eq!(target.read32(0x2000_0010).unwrap(), 0xdead_be01);
        assert_eq!(target.read16(0x2000_0012).unwrap(), 0xdead);
        assert_eq!(target.trace().len(), 4);
    }

    #[test]
    fn test_unmapped_access_latches_error() {
        let mut target = target();
        assert_eq!(target.read32(0x1000_0000), Err(Error::Transport));
        assert!(target.check_error());
        assert!(!target.check_error());
    }

    #[test]
    fn test_link_drop_and_reconnect() {
        let mut target = target();
        target.fail_after(1);
        assert!(target.write32(0x2000_0000, 1).is_ok());
        assert_eq!(target.write32(0x2000_0004, 2), Err(Error::Transport));
        assert!(target.link_down());
        target.reconnect();
        assert_eq!(target.read32(0x2000_0000).unwrap(), 1);
        assert_eq!(target.read32(0x2000_0004).unwrap(), 0);
    }

    #[test]
    fn test_glitch_fails_one_access() {
        let mut target = target();
        target.glitch_after(1);
        assert!(target.write32(0x2000_0000, 1).is_ok());
        assert_eq!(target.write32(0x2000_0004, 2), Err(Error::Transport));
        assert!(!target.link_down());
        assert!(target.check_error());
        assert!(target.write32(0x2000_0004, 3).is_ok());
        assert_eq!(target.read32(0x2000_0004).unwrap(), 3);
    }
}
