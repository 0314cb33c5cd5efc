//! Option bytes and read protection
//!
//! Every option word stores a 16-bit value in its low half and the bitwise
//! complement in its high half. The controller only loads words whose
//! halves match.

use core::fmt;

use swdflash_core::command::Console;
use swdflash_core::error::{Error, Result};
use swdflash_core::target::{Deadline, Target};

use crate::family::{Family, FamilyInfo};
use crate::nvm::{unlock_options, PROGRESS_PERIOD_MS};
use crate::regs::{
    Controller, L0Optr, L1Optr, Pecr, Sr, L1_OPTR_BOR_LEV_MASK, L1_OPTR_BOR_LEV_SHIFT,
    OPTION_BASE, RDP_LEVEL0, RDP_LEVEL2,
};

/// Option word 0 with RDPROT at level 1
const RDP_LEVEL1_WORD: u32 = 0xffff_0000;
/// Option word 0 with RDPROT at level 0
const RDP_LEVEL0_WORD: u32 = 0xff55_00aa;

/// Read protection level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadProtection {
    /// No protection
    Level0,
    /// Debug access to NVM blocked, reversible with a mass erase
    Level1,
    /// Debug disabled for good
    Level2,
}

impl ReadProtection {
    /// Decode the RDPROT byte
    pub fn from_byte(rdprot: u8) -> Self {
        match rdprot {
            RDP_LEVEL0 => Self::Level0,
            RDP_LEVEL2 => Self::Level2,
            _ => Self::Level1,
        }
    }

    /// Decode the RDPROT byte of an OPTR value
    pub fn from_optr(optr: u32) -> Self {
        Self::from_byte(optr as u8)
    }

    /// Numeric level
    pub fn level(self) -> u8 {
        match self {
            Self::Level0 => 0,
            Self::Level1 => 1,
            Self::Level2 => 2,
        }
    }

    /// Whether debug access to the arrays is blocked
    pub fn is_protected(self) -> bool {
        self != Self::Level0
    }
}

/// Read the protection level the device booted with
pub fn read_protection<T: Target + ?Sized>(
    target: &mut T,
    controller: Controller,
) -> Result<ReadProtection> {
    Ok(ReadProtection::from_optr(target.read32(controller.optr())?))
}

/// One 32-bit option word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionWord(pub u32);

impl OptionWord {
    /// Encode a 16-bit value with its complement
    pub fn encode(value: u16) -> Self {
        Self(value as u32 | ((!value as u32) << 16))
    }

    /// Stored value
    pub fn low(self) -> u16 {
        self.0 as u16
    }

    /// Stored complement
    pub fn high(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Whether the halves are complements of each other
    pub fn is_valid(self) -> bool {
        self.low() ^ self.high() == 0xffff
    }

    /// Check a word read from `addr`
    pub fn check(self, addr: u32) -> Result<u16> {
        if self.is_valid() {
            Ok(self.low())
        } else {
            Err(Error::OptionIntegrity {
                addr,
                value: self.0,
            })
        }
    }
}

impl fmt::Display for OptionWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:04x} 0x{:04x} {}",
            self.low(),
            self.high(),
            if self.is_valid() { "OK" } else { "ERR" }
        )
    }
}

/// Whether `addr` can be targeted by an option write
pub fn is_option_addr(family: &FamilyInfo, addr: u32) -> bool {
    addr % 4 == 0 && addr >= OPTION_BASE && addr < OPTION_BASE + family.option_size
}

/// Print every option word and the decoded OPTR
pub fn report<T: Target + ?Sized>(
    target: &mut T,
    family: Family,
    out: &mut dyn Console,
) -> Result<()> {
    let info = family.info();
    for addr in (OPTION_BASE..OPTION_BASE + info.option_size).step_by(4) {
        let word = OptionWord(target.read32(addr)?);
        writeln!(out, "0x{:08x}: {}", addr, word);
        if let Err(e) = word.check(addr) {
            log::warn!("{}", e);
        }
    }

    let optr = target.read32(info.controller.optr())?;
    let rdp = ReadProtection::from_optr(optr).level();
    if family.is_l0() {
        let bits = L0Optr::from_bits_truncate(optr);
        writeln!(
            out,
            "OPTR: 0x{:08x}, RDPROT {}, WPRMOD {}, WDG_SW {}, BOOT1 {}",
            optr,
            rdp,
            bits.contains(L0Optr::WPRMOD) as u8,
            bits.contains(L0Optr::WDG_SW) as u8,
            bits.contains(L0Optr::BOOT1) as u8
        );
    } else {
        let bits = L1Optr::from_bits_truncate(optr);
        writeln!(
            out,
            "OPTR: 0x{:08x}, RDPROT {}, SPRMOD {}, BOR_LEV {}, WDG_SW {}, nRST_STOP {}, nRST_STDBY {}, nBFB2 {}",
            optr,
            rdp,
            bits.contains(L1Optr::SPRMOD) as u8,
            (optr >> L1_OPTR_BOR_LEV_SHIFT) & L1_OPTR_BOR_LEV_MASK,
            bits.contains(L1Optr::IWDG_SW) as u8,
            bits.contains(L1Optr::NRST_STOP) as u8,
            bits.contains(L1Optr::NRST_STDBY) as u8,
            bits.contains(L1Optr::NBFB2) as u8
        );
    }
    Ok(())
}

/// Regain access to a read protected device
///
/// Steps protection to level 1 and back to level 0 with an option reload
/// after each step. Leaving level 1 makes the device erase flash and data
/// EEPROM and reset. The reset may drop the debug link while the reload is
/// still being polled: that is reported as success.
pub fn protected_mass_erase<T: Target + ?Sized>(target: &mut T, controller: Controller) -> Result<()> {
    log::info!("Regressing read protection to level 0, this erases the device");
    let mut nvm = unlock_options(target, controller)?;

    nvm.write32(OPTION_BASE, RDP_LEVEL1_WORD)?;
    nvm.write32(controller.pecr(), Pecr::OBL_LAUNCH.bits())?;
    nvm.write32(OPTION_BASE, RDP_LEVEL0_WORD)?;
    nvm.write32(controller.pecr(), Pecr::OBL_LAUNCH.bits())?;

    let mut deadline = Deadline::start(&*nvm, PROGRESS_PERIOD_MS);
    let reload = wait_reload(&mut *nvm, controller, &mut deadline);
    nvm.lock();

    match reload {
        Err(Error::Transport) => {
            log::warn!("Debug link lost during option reload, assuming device reset");
            Ok(())
        }
        other => other,
    }
}

fn wait_reload<T: Target + ?Sized>(
    target: &mut T,
    controller: Controller,
    deadline: &mut Deadline,
) -> Result<()> {
    while Sr::from_bits_retain(target.read32(controller.sr())?).contains(Sr::BSY) {
        if target.check_error() {
            return Err(Error::Transport);
        }
        deadline.tick(target);
    }
    Ok(())
}
