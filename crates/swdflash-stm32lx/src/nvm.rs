//! Register-sequenced erase and program
//!
//! Every operation follows the same shape: unlock, select a mode in PECR,
//! confirm the controller took it, issue the trigger writes, relock, then
//! wait for the controller to go idle. Relocking goes through [`Unlocked`],
//! which writes PELOCK when dropped, so an error on any step still leaves
//! the controller locked.
//!
//! Error flags in SR are cleared before a new erase, not after a failed
//! operation. A write that follows a failed write therefore reports the
//! earlier failure until something clears the flags.

use core::ops::{Deref, DerefMut};

use swdflash_core::error::{Error, Result};
use swdflash_core::poll::busy_wait;
use swdflash_core::region::NvmRegion;
use swdflash_core::target::{Deadline, Target};

use crate::family::FamilyInfo;
use crate::regs::{Controller, Pecr, Sr, EEPROM_BASE, OPTKEY, PEKEY, PRGKEY};

/// Progress period of long running operations
pub const PROGRESS_PERIOD_MS: u32 = 500;

/// Width of a single data EEPROM write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWidth {
    /// 8 bits
    Byte,
    /// 16 bits
    HalfWord,
    /// 32 bits
    Word,
}

impl DataWidth {
    /// Size in bytes
    pub fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::HalfWord => 2,
            Self::Word => 4,
        }
    }

    /// Keyword used by the monitor command
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::HalfWord => "halfword",
            Self::Word => "word",
        }
    }
}

/// Unlocked controller
///
/// Dereferences to the target. Dropping the guard (or calling
/// [`Unlocked::lock`]) sets PELOCK again, which also relocks program
/// memory and option bytes.
pub struct Unlocked<'a, T: Target + ?Sized> {
    target: &'a mut T,
    controller: Controller,
}

impl<T: Target + ?Sized> Unlocked<'_, T> {
    /// Relock now
    pub fn lock(self) {}
}

impl<T: Target + ?Sized> Deref for Unlocked<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.target
    }
}

impl<T: Target + ?Sized> DerefMut for Unlocked<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.target
    }
}

impl<T: Target + ?Sized> Drop for Unlocked<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = lock(&mut *self.target, self.controller) {
            log::warn!("Failed to relock NVM controller: {}", e);
        }
    }
}

/// Set PELOCK, whatever its current state
pub fn lock<T: Target + ?Sized>(target: &mut T, controller: Controller) -> Result<()> {
    target.write32(controller.pecr(), Pecr::PELOCK.bits())
}

fn unlock_with<'a, T: Target + ?Sized>(
    target: &'a mut T,
    controller: Controller,
    key_reg: u32,
    keys: [u32; 2],
    lock_bit: Pecr,
) -> Result<Unlocked<'a, T>> {
    // Start from a known state: locking PECR also locks everything below it
    target.write32(controller.pecr(), Pecr::PELOCK.bits())?;
    let mut guard = Unlocked { target, controller };

    for key in PEKEY {
        guard.write32(controller.pekeyr(), key)?;
    }
    for key in keys {
        guard.write32(key_reg, key)?;
    }

    let pecr = Pecr::from_bits_retain(guard.read32(controller.pecr())?);
    if pecr.contains(lock_bit) {
        log::debug!("{:?} still set after key sequence (PECR 0x{:08x})", lock_bit, pecr.bits());
        return Err(Error::UnlockFailed);
    }
    Ok(guard)
}

/// Unlock PECR and program memory
pub fn unlock_program<T: Target + ?Sized>(
    target: &mut T,
    controller: Controller,
) -> Result<Unlocked<'_, T>> {
    unlock_with(target, controller, controller.prgkeyr(), PRGKEY, Pecr::PRGLOCK)
}

/// Unlock PECR and the option bytes
pub fn unlock_options<T: Target + ?Sized>(
    target: &mut T,
    controller: Controller,
) -> Result<Unlocked<'_, T>> {
    unlock_with(target, controller, controller.optkeyr(), OPTKEY, Pecr::OPTLOCK)
}

/// Request `mode` in PECR and confirm the controller took it
fn select_mode<T: Target + ?Sized>(target: &mut T, controller: Controller, mode: Pecr) -> Result<()> {
    target.write32(controller.pecr(), mode.bits())?;
    let found = Pecr::from_bits_retain(target.read32(controller.pecr())?) & mode;
    if found != mode {
        return Err(Error::ControllerRejected {
            expected: mode.bits(),
            found: found.bits(),
        });
    }
    Ok(())
}

fn clear_errors<T: Target + ?Sized>(target: &mut T, controller: Controller) -> Result<()> {
    target.write32(controller.sr(), Sr::ERROR_MASK.bits())
}

/// Erase `[addr, addr + len)` of program flash, one page trigger per block
///
/// Erasing the region as a whole paces progress output while the triggers
/// go out and while the controller finishes. All triggers are issued back
/// to back: the busy flag is only awaited once, after the last one.
pub fn flash_erase<T: Target + ?Sized>(
    target: &mut T,
    controller: Controller,
    region: &NvmRegion,
    addr: u32,
    len: u32,
) -> Result<()> {
    let whole = region.is_whole(addr, len);
    log::debug!("Erasing flash 0x{:08x}+0x{:x}", addr, len);

    let mut nvm = unlock_program(target, controller)?;
    select_mode(&mut *nvm, controller, Pecr::ERASE | Pecr::PROG)?;
    clear_errors(&mut *nvm, controller)?;

    let mut deadline = Deadline::start(&*nvm, PROGRESS_PERIOD_MS);
    for offset in (0..len).step_by(region.block_size as usize) {
        nvm.write32(addr + offset, 0)?;
        if whole {
            deadline.tick(&mut *nvm);
        }
    }
    nvm.lock();

    busy_wait(target, &controller.status(), whole.then_some(&mut deadline))
}

/// Program `data` at `addr` in half-page bursts
///
/// `addr` and the length of `data` must be multiples of the half-page.
pub fn flash_write<T: Target + ?Sized>(
    target: &mut T,
    controller: Controller,
    write_size: u32,
    addr: u32,
    data: &[u8],
) -> Result<()> {
    if addr % write_size != 0 || data.len() as u32 % write_size != 0 {
        return Err(Error::InvalidAlignment);
    }

    let mut nvm = unlock_program(target, controller)?;
    busy_wait(&mut *nvm, &controller.status(), None)?;
    select_mode(&mut *nvm, controller, Pecr::PROG | Pecr::FPRG)?;
    nvm.write_bytes(addr, data)?;
    nvm.lock();

    busy_wait(target, &controller.status(), None)
}

/// Erase data EEPROM words covering `[addr, addr + len)`
pub fn eeprom_erase<T: Target + ?Sized>(
    target: &mut T,
    controller: Controller,
    region: &NvmRegion,
    addr: u32,
    len: u32,
) -> Result<()> {
    let start = addr & !3;
    log::debug!("Erasing EEPROM 0x{:08x}+0x{:x}", start, len);

    let mut nvm = unlock_program(target, controller)?;
    select_mode(&mut *nvm, controller, Pecr::ERASE | Pecr::DATA)?;
    clear_errors(&mut *nvm, controller)?;

    for offset in (0..len).step_by(region.block_size as usize) {
        nvm.write32(start + offset, 0)?;
    }
    nvm.lock();

    busy_wait(target, &controller.status(), None)
}

/// Write `data` to data EEPROM, words first, the tail bytewise
pub fn eeprom_write<T: Target + ?Sized>(
    target: &mut T,
    family: &FamilyInfo,
    addr: u32,
    data: &[u8],
) -> Result<()> {
    let controller = family.controller;
    let mut nvm = unlock_program(target, controller)?;
    select_mode(&mut *nvm, controller, family.eeprom_write_mode)?;

    let words = data.chunks_exact(4);
    let tail = words.remainder();
    let mut at = addr;
    for word in words {
        nvm.write32(at, u32::from_le_bytes([word[0], word[1], word[2], word[3]]))?;
        at += 4;
    }
    for &byte in tail {
        nvm.write8(at, byte)?;
        at += 1;
    }
    nvm.lock();

    busy_wait(target, &controller.status(), None)
}

/// Write one byte, half-word or word of data EEPROM in fixed-time mode
pub fn eeprom_write_one<T: Target + ?Sized>(
    target: &mut T,
    family: &FamilyInfo,
    addr: u32,
    width: DataWidth,
    value: u32,
) -> Result<()> {
    if addr % width.bytes() != 0 {
        return Err(Error::InvalidAlignment);
    }
    if addr < EEPROM_BASE || addr - EEPROM_BASE + width.bytes() > family.eeprom_size {
        return Err(Error::AddressOutOfBounds);
    }

    let controller = family.controller;
    let mut nvm = unlock_program(target, controller)?;
    clear_errors(&mut *nvm, controller)?;
    select_mode(&mut *nvm, controller, family.eeprom_write_mode | Pecr::FIX)?;

    match width {
        DataWidth::Byte => nvm.write8(addr, value as u8)?,
        DataWidth::HalfWord => nvm.write16(addr, value as u16)?,
        DataWidth::Word => nvm.write32(addr, value)?,
    }
    nvm.lock();

    busy_wait(target, &controller.status(), None)
}

/// Program one option word as given, complement included
pub fn option_write<T: Target + ?Sized>(
    target: &mut T,
    controller: Controller,
    addr: u32,
    value: u32,
) -> Result<()> {
    let mut nvm = unlock_options(target, controller)?;
    select_mode(&mut *nvm, controller, Pecr::FIX)?;
    nvm.write32(addr, value)?;
    nvm.lock();

    busy_wait(target, &controller.status(), None)
}

/// Reload the option bytes, which resets the device
pub fn obl_launch<T: Target + ?Sized>(target: &mut T, controller: Controller) -> Result<()> {
    let mut nvm = unlock_options(target, controller)?;
    nvm.write32(controller.pecr(), Pecr::OBL_LAUNCH.bits())
}
