//! Sector erase and program through the boot ROM

use alloc::vec::Vec;

use swdflash_core::error::{Error, Result};
use swdflash_core::target::Target;

use crate::iap::{Iap, IapCommand};
use crate::wdt;

/// Erase sector size
pub const SECTOR_SIZE: u32 = 0x8000;
/// Largest chunk one program call copies
pub const WRITE_SIZE: u32 = 4096;
/// Clock the ROM times erase and program against, in kHz
pub const CPU_CLOCK_KHZ: u32 = 12_000;

/// Byte counts the program command accepts
const PROGRAM_SIZES: [usize; 4] = [256, 512, 1024, 4096];
/// Program destinations must be aligned to the smallest count
const PROGRAM_ALIGN: u32 = 256;
/// Vector table words covered by the boot ROM checksum
const VECTOR_WORDS: usize = 8;

const MAINCLKSELA: u32 = 0x4000_0280;
const MAINCLKSELB: u32 = 0x4000_0284;
const AHBCLKDIV: u32 = 0x4000_0380;
const FLASHCFG: u32 = 0x4000_0400;
const FLASHCFG_DEFAULT: u32 = 0x1a;

/// Reset, step past the boot ROM and attach again
///
/// Right after reset the ROM is mapped at 0. Letting the core execute one
/// instruction restores the flash mapping.
pub fn reset_attach<T: Target + ?Sized>(target: &mut T) -> Result<()> {
    target.reset()?;
    target.halt_resume(true)?;
    target.attach()
}

/// Bring the part into a state the ROM can erase in
///
/// The ROM may have raised the main clock, so it is forced back to the
/// 12 MHz FRO with matching flash wait states.
pub fn flash_init<T: Target + ?Sized>(target: &mut T) -> Result<()> {
    reset_attach(target)?;
    wdt::set_period(target)?;
    target.write32(MAINCLKSELA, 0)?;
    target.write32(MAINCLKSELB, 0)?;
    target.write32(AHBCLKDIV, 0)?;
    target.write32(FLASHCFG, FLASHCFG_DEFAULT)
}

/// Sector numbers touched by `[addr, addr + len)`
pub fn sector_span(addr: u32, len: u32) -> (u32, u32) {
    let last = addr + len.max(1) - 1;
    (addr / SECTOR_SIZE, last / SECTOR_SIZE)
}

/// Erase every sector touched by `[addr, addr + len)` and blank check them
pub fn erase<T: Target + ?Sized>(target: &mut T, iap: &Iap, addr: u32, len: u32) -> Result<()> {
    flash_init(target)?;
    let (first, last) = sector_span(addr, len);
    log::debug!("Erasing sectors {}..={}", first, last);
    iap.call(target, IapCommand::Prepare, &[first, last])?;
    iap.call(target, IapCommand::Erase, &[first, last, CPU_CLOCK_KHZ])?;
    iap.call(target, IapCommand::BlankCheck, &[first, last])?;
    Ok(())
}

/// Store the vector table checksum the boot ROM validates
///
/// The eighth word makes the first eight words sum to zero.
pub fn patch_vector_checksum(chunk: &mut [u8]) {
    if chunk.len() < VECTOR_WORDS * 4 {
        return;
    }
    let sum = chunk[..(VECTOR_WORDS - 1) * 4]
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .fold(0u32, u32::wrapping_add);
    let at = (VECTOR_WORDS - 1) * 4;
    chunk[at..at + 4].copy_from_slice(&sum.wrapping_neg().to_le_bytes());
}

/// Program `data` at `addr` into already erased flash
///
/// Data is copied in chunks of up to [`WRITE_SIZE`]; a short tail is padded
/// with the erased value to the next count the ROM accepts. A write into
/// address 0 gets its vector checksum patched.
pub fn write<T: Target + ?Sized>(target: &mut T, iap: &Iap, addr: u32, data: &[u8]) -> Result<()> {
    if addr % PROGRAM_ALIGN != 0 {
        return Err(Error::InvalidAlignment);
    }
    let mut buf = Vec::new();
    buf.try_reserve_exact(WRITE_SIZE as usize)
        .map_err(|_| Error::OutOfMemory)?;

    for (index, chunk) in data.chunks(WRITE_SIZE as usize).enumerate() {
        let dst = addr + index as u32 * WRITE_SIZE;
        let count = PROGRAM_SIZES
            .into_iter()
            .find(|&size| size >= chunk.len())
            .unwrap_or(WRITE_SIZE as usize);
        buf.clear();
        buf.extend_from_slice(chunk);
        buf.resize(count, 0xff);
        if dst == 0 {
            patch_vector_checksum(&mut buf);
        }

        // A 256-byte aligned unit may straddle two sectors
        let (first, last) = sector_span(dst, count as u32);
        iap.call(target, IapCommand::Prepare, &[first, last])?;
        target.write_bytes(iap.staging(), &buf)?;
        iap.call(
            target,
            IapCommand::Program,
            &[dst, iap.staging(), count as u32, CPU_CLOCK_KHZ],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_span() {
        assert_eq!(sector_span(0, 1), (0, 0));
        assert_eq!(sector_span(0x8000, 0), (1, 1));
        assert_eq!(sector_span(0x7fff, 2), (0, 1));
        assert_eq!(sector_span(0, 0x8_0000), (0, 15));
    }

    #[test]
    fn test_vector_checksum() {
        let mut chunk = [0u8; 64];
        for (i, b) in chunk.iter_mut().enumerate() {
            *b = (i * 7) as u8;
        }
        patch_vector_checksum(&mut chunk);
        let sum = chunk[..32]
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .fold(0u32, u32::wrapping_add);
        assert_eq!(sum, 0);
        // Words past the vector table are untouched
        assert_eq!(chunk[32], 32 * 7);

        let mut short = [0x11u8; 16];
        patch_vector_checksum(&mut short);
        assert_eq!(short, [0x11; 16]);
    }
}
