//! NVM region descriptor
//!
//! A region is the unit erase and program operations act on: one program
//! flash bank or one data flash (EEPROM) array. Targets own an ordered list
//! of them.

use crate::error::{Error, Result};

/// What kind of array a region maps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Program flash
    Flash,
    /// Flash-backed data memory (EEPROM emulation)
    DataFlash,
}

/// One contiguous NVM array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvmRegion {
    /// Kind of array
    pub kind: RegionKind,
    /// First address of the region
    pub start: u32,
    /// Length in bytes
    pub length: u32,
    /// Erase granularity in bytes
    pub block_size: u32,
    /// Preferred program unit in bytes
    pub write_size: u32,
    /// Value every byte reads as once erased
    pub erased: u8,
}

impl NvmRegion {
    /// Create a program flash region
    pub const fn flash(start: u32, length: u32, block_size: u32, write_size: u32) -> Self {
        Self {
            kind: RegionKind::Flash,
            start,
            length,
            block_size,
            write_size,
            erased: 0xff,
        }
    }

    /// Create a data flash region
    pub const fn data_flash(start: u32, length: u32, block_size: u32) -> Self {
        Self {
            kind: RegionKind::DataFlash,
            start,
            length,
            block_size,
            write_size: block_size,
            erased: 0x00,
        }
    }

    /// Override the erased value
    pub const fn with_erased(mut self, erased: u8) -> Self {
        self.erased = erased;
        self
    }

    /// One past the last address of the region
    pub fn end(&self) -> u32 {
        self.start + self.length
    }

    /// Whether `[addr, addr + len)` falls entirely inside the region
    pub fn contains_range(&self, addr: u32, len: u32) -> bool {
        let end = addr as u64 + len as u64;
        addr >= self.start && end <= self.end() as u64
    }

    /// Whether the range covers the region exactly
    pub fn is_whole(&self, addr: u32, len: u32) -> bool {
        addr == self.start && len == self.length
    }

    /// Round `addr` down to the start of its erase block
    pub fn block_start(&self, addr: u32) -> u32 {
        self.start + (addr - self.start) / self.block_size * self.block_size
    }

    /// Check that a range lies inside the region
    pub fn check_range(&self, addr: u32, len: u32) -> Result<()> {
        if self.contains_range(addr, len) {
            Ok(())
        } else {
            Err(Error::AddressOutOfBounds)
        }
    }
}
