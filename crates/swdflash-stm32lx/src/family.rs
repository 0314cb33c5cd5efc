//! Family and category table
//!
//! Everything that differs between the L0 categories and the L1 lives in
//! one [`FamilyInfo`] record per variant, so the NVM code never branches on
//! the part number directly.

use crate::regs::{Controller, Pecr, L0_CONTROLLER, L1_CONTROLLER};

/// Supported device variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// STM32L0 category 1 (L01x/L02x)
    L0Cat1,
    /// STM32L0 category 2 (L031/L041)
    L0Cat2,
    /// STM32L0 category 3 (L05x/L06x)
    L0Cat3,
    /// STM32L0 category 5 (L07x/L08x), dual bank
    L0Cat5,
    /// STM32L1
    L1,
}

/// Per-variant constants
#[derive(Debug, Clone, Copy)]
pub struct FamilyInfo {
    /// Family label used in the variant string
    pub name: &'static str,
    /// NVM controller
    pub controller: Controller,
    /// Flash erase page in bytes
    pub page_size: u32,
    /// Size of the option byte area in bytes
    pub option_size: u32,
    /// Size of the data EEPROM in bytes
    pub eeprom_size: u32,
    /// PECR mode for a bulk data EEPROM write
    pub eeprom_write_mode: Pecr,
    /// Number of flash banks the program memory is split into
    pub banks: u32,
    /// DBGMCU keeps debug alive in low power modes on attach
    pub low_power_debug: bool,
}

impl FamilyInfo {
    /// Half-page, the flash program unit
    pub const fn write_size(&self) -> u32 {
        self.page_size / 2
    }
}

const fn l0(eeprom_size: u32, banks: u32) -> FamilyInfo {
    FamilyInfo {
        name: "STM32L0",
        controller: Controller::new(L0_CONTROLLER),
        page_size: 0x80,
        option_size: 12,
        eeprom_size,
        eeprom_write_mode: Pecr::DATA,
        banks,
        low_power_debug: true,
    }
}

static L0_CAT1: FamilyInfo = l0(512, 1);
static L0_CAT2: FamilyInfo = l0(1024, 1);
static L0_CAT3: FamilyInfo = l0(2048, 1);
static L0_CAT5: FamilyInfo = l0(6144, 2);

static L1: FamilyInfo = FamilyInfo {
    name: "STM32L1",
    controller: Controller::new(L1_CONTROLLER),
    page_size: 0x100,
    option_size: 32,
    eeprom_size: 16384,
    eeprom_write_mode: Pecr::empty(),
    banks: 1,
    low_power_debug: false,
};

impl Family {
    /// Look up a DBGMCU device id
    pub fn from_part_id(part_id: u16) -> Option<Self> {
        match part_id {
            0x457 => Some(Self::L0Cat1),
            0x425 => Some(Self::L0Cat2),
            0x417 => Some(Self::L0Cat3),
            0x447 => Some(Self::L0Cat5),
            // Cat.1, Cat.2, Cat.3, Cat.4, Cat.5/6
            0x416 | 0x429 | 0x427 | 0x436 | 0x437 => Some(Self::L1),
            _ => None,
        }
    }

    /// Constants of this variant
    pub fn info(self) -> &'static FamilyInfo {
        match self {
            Self::L0Cat1 => &L0_CAT1,
            Self::L0Cat2 => &L0_CAT2,
            Self::L0Cat3 => &L0_CAT3,
            Self::L0Cat5 => &L0_CAT5,
            Self::L1 => &L1,
        }
    }

    /// Whether this is an L0 part
    pub fn is_l0(self) -> bool {
        !matches!(self, Self::L1)
    }
}
