//! STM32L0/L1 NVM controller register definitions
//!
//! Both families share one controller layout at a family specific base
//! address. Offsets and bits follow RM0377 (L0) and RM0038 (L1).

use bitflags::bitflags;

// ============================================================================
// Register offsets
// ============================================================================

/// Program/erase control register
pub const REG_PECR: u32 = 0x04;
/// PECR unlock key register
pub const REG_PEKEYR: u32 = 0x0c;
/// Program memory unlock key register
pub const REG_PRGKEYR: u32 = 0x10;
/// Option byte unlock key register
pub const REG_OPTKEYR: u32 = 0x14;
/// Status register
pub const REG_SR: u32 = 0x18;
/// Option byte register (loaded values)
pub const REG_OPTR: u32 = 0x1c;

// ============================================================================
// Unlock keys
// ============================================================================

/// PEKEYR sequence
pub const PEKEY: [u32; 2] = [0x89ab_cdef, 0x0203_0405];
/// PRGKEYR sequence
pub const PRGKEY: [u32; 2] = [0x8c9d_aebf, 0x1314_1516];
/// OPTKEYR sequence
pub const OPTKEY: [u32; 2] = [0xfbea_d9c8, 0x2425_2627];

// ============================================================================
// Memory map
// ============================================================================

/// L0 controller base
pub const L0_CONTROLLER: u32 = 0x4002_2000;
/// L1 controller base
pub const L1_CONTROLLER: u32 = 0x4002_3c00;

/// Program flash base
pub const FLASH_BASE: u32 = 0x0800_0000;
/// Data EEPROM base
pub const EEPROM_BASE: u32 = 0x0808_0000;
/// Option byte area base
pub const OPTION_BASE: u32 = 0x1ff8_0000;
/// L0 flash size register, in KiB
pub const L0_FLASH_SIZE_REG: u32 = 0x1ff8_007c;

/// L0 debug MCU configuration register
pub const L0_DBGMCU_CR: u32 = 0x4001_5804;
/// L0 debug MCU APB1 freeze register
pub const L0_DBGMCU_APB1FZ: u32 = 0x4001_5808;
/// Keep debug access in sleep, stop and standby
pub const DBGMCU_CR_LOW_POWER: u32 = 0x7;
/// Freeze the window watchdog while halted
pub const DBGMCU_APB1FZ_WWDG: u32 = 1 << 11;
/// Freeze the independent watchdog while halted
pub const DBGMCU_APB1FZ_IWDG: u32 = 1 << 12;

// ============================================================================
// Read protection bytes
// ============================================================================

/// RDPROT value of protection level 0
pub const RDP_LEVEL0: u8 = 0xaa;
/// RDPROT value of protection level 2 (irreversible)
pub const RDP_LEVEL2: u8 = 0xcc;

bitflags! {
    /// PECR bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Pecr: u32 {
        /// PECR and data EEPROM are locked
        const PELOCK     = 1 << 0;
        /// Program memory is locked
        const PRGLOCK    = 1 << 1;
        /// Option bytes are locked
        const OPTLOCK    = 1 << 2;
        /// Program memory selected
        const PROG       = 1 << 3;
        /// Data EEPROM selected
        const DATA       = 1 << 4;
        /// Fixed time data write (erase before program)
        const FIX        = 1 << 8;
        /// Erase operation
        const ERASE      = 1 << 9;
        /// Half-page programming
        const FPRG       = 1 << 10;
        /// End of operation interrupt enable
        const EOPIE      = 1 << 16;
        /// Error interrupt enable
        const ERRIE      = 1 << 17;
        /// Reload option bytes (resets the device)
        const OBL_LAUNCH = 1 << 18;
    }
}

bitflags! {
    /// SR bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Sr: u32 {
        /// Operation in progress
        const BSY        = 1 << 0;
        /// End of operation
        const EOP        = 1 << 1;
        /// Write protection error
        const WRPERR     = 1 << 8;
        /// Programming alignment error
        const PGAERR     = 1 << 9;
        /// Size error
        const SIZERR     = 1 << 10;
        /// Write attempted over a non-zero word
        const NOTZEROERR = 1 << 16;
    }
}

impl Sr {
    /// Flags that mark a failed operation
    pub const ERROR_MASK: Self = Self::WRPERR
        .union(Self::PGAERR)
        .union(Self::SIZERR)
        .union(Self::NOTZEROERR);
}

bitflags! {
    /// L0 OPTR user option bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct L0Optr: u32 {
        /// Write protection mode (PCROP)
        const WPRMOD     = 1 << 8;
        /// Software independent watchdog
        const WDG_SW     = 1 << 20;
        /// No reset on stop entry
        const NRST_STOP  = 1 << 21;
        /// No reset on standby entry
        const NRST_STDBY = 1 << 22;
        /// Boot from bank 2
        const BFB2       = 1 << 23;
        /// Boot1 option
        const BOOT1      = 1 << 31;
    }
}

bitflags! {
    /// L1 OPTR user option bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct L1Optr: u32 {
        /// Write protection mode (PCROP)
        const SPRMOD     = 1 << 8;
        /// Software independent watchdog
        const IWDG_SW    = 1 << 20;
        /// No reset on stop entry
        const NRST_STOP  = 1 << 21;
        /// No reset on standby entry
        const NRST_STDBY = 1 << 22;
        /// Boot from bank 2 disabled
        const NBFB2      = 1 << 23;
    }
}

/// Brown-out reset level field of the L1 OPTR
pub const L1_OPTR_BOR_LEV_SHIFT: u32 = 16;
/// Width mask of the brown-out level field
pub const L1_OPTR_BOR_LEV_MASK: u32 = 0xf;

/// Controller register addresses for one family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controller {
    base: u32,
}

impl Controller {
    /// Controller at `base`
    pub const fn new(base: u32) -> Self {
        Self { base }
    }

    /// Base address
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// PECR address
    pub const fn pecr(&self) -> u32 {
        self.base + REG_PECR
    }

    /// PEKEYR address
    pub const fn pekeyr(&self) -> u32 {
        self.base + REG_PEKEYR
    }

    /// PRGKEYR address
    pub const fn prgkeyr(&self) -> u32 {
        self.base + REG_PRGKEYR
    }

    /// OPTKEYR address
    pub const fn optkeyr(&self) -> u32 {
        self.base + REG_OPTKEYR
    }

    /// SR address
    pub const fn sr(&self) -> u32 {
        self.base + REG_SR
    }

    /// OPTR address
    pub const fn optr(&self) -> u32 {
        self.base + REG_OPTR
    }

    /// Status register description for the poller
    pub const fn status(&self) -> swdflash_core::poll::StatusRegister {
        swdflash_core::poll::StatusRegister {
            addr: self.sr(),
            busy: Sr::BSY.bits(),
            error_mask: Sr::ERROR_MASK.bits(),
        }
    }
}
