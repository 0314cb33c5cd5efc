//! STM32L0/L1 NVM controller model
//!
//! Emulates the key/lock state machine, the PECR mode bits, the erase and
//! program triggers, a busy counter on SR, the write-1-to-clear error flags
//! and the option byte area with its reload. Flash and EEPROM read as zero
//! once erased.

use swdflash_core::error::{Error, Result};

use crate::{Core, Device, Memory, SimTarget};

const PECR: u32 = 0x04;
const PEKEYR: u32 = 0x0c;
const PRGKEYR: u32 = 0x10;
const OPTKEYR: u32 = 0x14;
const SR: u32 = 0x18;
const OPTR: u32 = 0x1c;

const PEKEY: [u32; 2] = [0x89ab_cdef, 0x0203_0405];
const PRGKEY: [u32; 2] = [0x8c9d_aebf, 0x1314_1516];
const OPTKEY: [u32; 2] = [0xfbea_d9c8, 0x2425_2627];

const PECR_PELOCK: u32 = 1 << 0;
const PECR_PRGLOCK: u32 = 1 << 1;
const PECR_OPTLOCK: u32 = 1 << 2;
const PECR_PROG: u32 = 1 << 3;
const PECR_DATA: u32 = 1 << 4;
const PECR_FIX: u32 = 1 << 8;
const PECR_ERASE: u32 = 1 << 9;
const PECR_FPRG: u32 = 1 << 10;
const PECR_EOPIE: u32 = 1 << 16;
const PECR_ERRIE: u32 = 1 << 17;
const PECR_OBL_LAUNCH: u32 = 1 << 18;
const PECR_LOCKS: u32 = PECR_PELOCK | PECR_PRGLOCK | PECR_OPTLOCK;

const SR_BSY: u32 = 1 << 0;
const SR_EOP: u32 = 1 << 1;
const SR_WRPERR: u32 = 1 << 8;
const SR_PGAERR: u32 = 1 << 9;
const SR_SIZERR: u32 = 1 << 10;
const SR_NOTZEROERR: u32 = 1 << 16;
const SR_CLEARABLE: u32 = SR_EOP | SR_WRPERR | SR_PGAERR | SR_SIZERR | SR_NOTZEROERR;

/// Start of program flash
pub const FLASH_BASE: u32 = 0x0800_0000;
/// Start of data EEPROM
pub const EEPROM_BASE: u32 = 0x0808_0000;
/// Start of the option byte area
pub const OPTION_BASE: u32 = 0x1ff8_0000;
/// Flash size register (KiB) of the L0 parts
pub const FLASH_SIZE_REG: u32 = 0x1ff8_007c;
/// SRAM of the emulated part
pub const SRAM_BASE: u32 = 0x2000_0000;

const L0_DBGMCU: u32 = 0x4001_5800;
const L1_DBGMCU: u32 = 0xe004_2000;

/// Read protection byte value for level 0
pub const RDP_LEVEL0: u8 = 0xaa;
/// Read protection byte value for level 2
pub const RDP_LEVEL2: u8 = 0xcc;

/// Family of the emulated part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFamily {
    /// STM32L0 (controller at 0x40022000, 128 byte pages)
    L0,
    /// STM32L1 (controller at 0x40023c00, 256 byte pages)
    L1,
}

/// Configuration of an emulated STM32L0/L1
#[derive(Debug, Clone)]
pub struct Stm32lxConfig {
    /// Controller family
    pub family: SimFamily,
    /// DBGMCU device id
    pub part_id: u16,
    /// Program flash size in bytes
    pub flash_size: u32,
    /// Data EEPROM size in bytes
    pub eeprom_size: u32,
    /// Read protection byte loaded at power up
    pub read_protection: u8,
}

impl Stm32lxConfig {
    /// STM32L07x/L08x (category 5, 192 KiB)
    pub fn l0_cat5() -> Self {
        Self {
            family: SimFamily::L0,
            part_id: 0x447,
            flash_size: 0x3_0000,
            eeprom_size: 0x1800,
            read_protection: RDP_LEVEL0,
        }
    }

    /// STM32L05x/L06x (category 3, 64 KiB)
    pub fn l0_cat3() -> Self {
        Self {
            family: SimFamily::L0,
            part_id: 0x417,
            flash_size: 0x1_0000,
            eeprom_size: 0x800,
            read_protection: RDP_LEVEL0,
        }
    }

    /// STM32L15x category 3
    pub fn l1() -> Self {
        Self {
            family: SimFamily::L1,
            part_id: 0x427,
            flash_size: 0x8_0000,
            eeprom_size: 0x4000,
            read_protection: RDP_LEVEL0,
        }
    }

    /// Same part, protected at the given read protection byte
    pub fn protected(mut self, read_protection: u8) -> Self {
        self.read_protection = read_protection;
        self
    }

    /// Build the target
    pub fn build(self) -> SimTarget<Stm32lxDevice> {
        let mut memory = Memory::default();
        let device = Stm32lxDevice::new(&self, &mut memory);
        SimTarget::new(device, memory)
    }
}

/// Emulated STM32L0/L1 NVM controller
#[derive(Debug)]
pub struct Stm32lxDevice {
    family: SimFamily,
    base: u32,
    page_size: u32,
    flash_size: u32,
    eeprom_size: u32,
    option_size: u32,
    pecr: u32,
    sr: u32,
    optr: u32,
    busy: u32,
    pe_stage: usize,
    prg_stage: usize,
    opt_stage: usize,
    key_fault: bool,
    link_drop: bool,
    /// Status reads an erase or program keeps BSY set for
    pub busy_reads: u32,
    /// Status reads an option reload keeps BSY set for
    pub reload_busy_reads: u32,
    /// PRGLOCK never clears, whatever keys are written
    pub stuck_program_lock: bool,
    /// Leave the debug link when a reload regresses protection to level 0
    pub reload_drops_link: bool,
    /// Addresses of every erase trigger write
    pub erase_triggers: Vec<u32>,
    /// Number of option byte reloads
    pub reloads: u32,
}

impl Stm32lxDevice {
    fn new(config: &Stm32lxConfig, memory: &mut Memory) -> Self {
        let (base, page_size, option_size) = match config.family {
            SimFamily::L0 => (0x4002_2000, 0x80, 12),
            SimFamily::L1 => (0x4002_3c00, 0x100, 32),
        };

        memory.map(FLASH_BASE, config.flash_size, 0);
        memory.map(EEPROM_BASE, config.eeprom_size, 0);
        memory.map(OPTION_BASE, 0x100, 0);
        memory.map(SRAM_BASE, 0x5000, 0);

        let dbgmcu = match config.family {
            SimFamily::L0 => L0_DBGMCU,
            SimFamily::L1 => L1_DBGMCU,
        };
        memory.map(dbgmcu, 0x10, 0);
        let _ = memory.write32(dbgmcu, 0x1000_0000 | config.part_id as u32);

        let _ = memory.write32(OPTION_BASE, complemented(config.read_protection as u32));
        let _ = memory.write32(OPTION_BASE + 4, complemented(0x8070));
        for addr in (OPTION_BASE + 8..OPTION_BASE + option_size).step_by(4) {
            let _ = memory.write32(addr, complemented(0));
        }
        let _ = memory.write_le(FLASH_SIZE_REG, config.flash_size / 1024, 2);

        let mut device = Self {
            family: config.family,
            base,
            page_size,
            flash_size: config.flash_size,
            eeprom_size: config.eeprom_size,
            option_size,
            pecr: PECR_LOCKS,
            sr: 0,
            optr: 0,
            busy: 0,
            pe_stage: 0,
            prg_stage: 0,
            opt_stage: 0,
            key_fault: false,
            link_drop: false,
            busy_reads: 2,
            reload_busy_reads: 4,
            stuck_program_lock: false,
            reload_drops_link: false,
            erase_triggers: Vec::new(),
            reloads: 0,
        };
        device.optr = device.load_optr(memory);
        device
    }

    /// Current PECR value
    pub fn pecr(&self) -> u32 {
        self.pecr
    }

    /// Whether PELOCK is set
    pub fn is_locked(&self) -> bool {
        self.pecr & PECR_PELOCK != 0
    }

    /// Current SR error and EOP flags
    pub fn status(&self) -> u32 {
        self.sr
    }

    /// Latch error flags in SR
    pub fn set_status(&mut self, flags: u32) {
        self.sr |= flags & SR_CLEARABLE;
    }

    /// Keep BSY set for `reads` status reads
    pub fn set_busy(&mut self, reads: u32) {
        self.busy = reads;
    }

    /// Loaded option register
    pub fn optr(&self) -> u32 {
        self.optr
    }

    /// Whether reads of the NVM arrays are blocked
    pub fn is_protected(&self) -> bool {
        self.optr as u8 != RDP_LEVEL0
    }

    /// Address of the controller registers
    pub fn controller_base(&self) -> u32 {
        self.base
    }

    fn load_optr(&self, memory: &Memory) -> u32 {
        let word = |offset| {
            let value = memory.read32(OPTION_BASE + offset).unwrap_or(0);
            if (value & 0xffff) ^ (value >> 16) == 0xffff {
                Some(value & 0xffff)
            } else {
                None
            }
        };
        // An option word that fails its complement check loads as level 1
        let low = word(0).unwrap_or(0);
        let high = word(4).unwrap_or(0);
        low | (high << 16)
    }

    fn reload(&mut self, memory: &mut Memory) {
        let was_protected = self.is_protected();
        self.optr = self.load_optr(memory);
        self.reloads += 1;
        self.busy += self.reload_busy_reads;
        log::debug!("sim: option reload, OPTR=0x{:08x}", self.optr);

        if was_protected && !self.is_protected() {
            memory.fill(FLASH_BASE, self.flash_size, 0);
            memory.fill(EEPROM_BASE, self.eeprom_size, 0);
            if self.reload_drops_link {
                self.pecr = PECR_LOCKS;
                self.link_drop = true;
            }
        }
    }

    fn in_flash(&self, addr: u32) -> bool {
        addr >= FLASH_BASE && addr < FLASH_BASE + self.flash_size
    }

    fn in_eeprom(&self, addr: u32) -> bool {
        addr >= EEPROM_BASE && addr < EEPROM_BASE + self.eeprom_size
    }

    fn in_options(&self, addr: u32) -> bool {
        addr >= OPTION_BASE && addr < OPTION_BASE + self.option_size
    }

    fn write_pecr(&mut self, memory: &mut Memory, value: u32) {
        if value & PECR_PELOCK != 0 {
            self.pecr = PECR_LOCKS;
            self.pe_stage = 0;
            self.prg_stage = 0;
            self.opt_stage = 0;
            return;
        }
        if self.pecr & PECR_PELOCK != 0 {
            return;
        }

        // L1 ignores mode changes while an operation is in flight
        if self.busy == 0 || self.family == SimFamily::L0 {
            let locks = (self.pecr | value) & (PECR_PRGLOCK | PECR_OPTLOCK);
            let mut modes = value
                & (PECR_PROG | PECR_DATA | PECR_FIX | PECR_ERASE | PECR_FPRG | PECR_EOPIE | PECR_ERRIE);
            if locks & PECR_PRGLOCK != 0 {
                modes &= !(PECR_PROG | PECR_FPRG);
                if modes & PECR_DATA == 0 {
                    modes &= !PECR_ERASE;
                }
            }
            if modes & PECR_PROG == 0 {
                modes &= !PECR_FPRG;
            }
            self.pecr = locks | modes;
        }

        if value & PECR_OBL_LAUNCH != 0 && self.pecr & PECR_OPTLOCK == 0 {
            self.reload(memory);
        }
    }

    fn write_key(&mut self, reg: u32, value: u32) {
        if self.key_fault {
            return;
        }
        let (keys, lock, stage) = match reg {
            PEKEYR => (PEKEY, PECR_PELOCK, &mut self.pe_stage),
            PRGKEYR => (PRGKEY, PECR_PRGLOCK, &mut self.prg_stage),
            _ => (OPTKEY, PECR_OPTLOCK, &mut self.opt_stage),
        };
        if reg != PEKEYR && self.pecr & PECR_PELOCK != 0 {
            return;
        }
        if self.pecr & lock == 0 {
            return;
        }
        if value != keys[*stage] {
            log::debug!("sim: bad key 0x{:08x}, controller locked until reset", value);
            *stage = 0;
            self.key_fault = true;
            return;
        }
        *stage += 1;
        if *stage == keys.len() {
            *stage = 0;
            if !(lock == PECR_PRGLOCK && self.stuck_program_lock) {
                self.pecr &= !lock;
            }
        }
    }

    fn read_register(&mut self, offset: u32) -> u32 {
        match offset {
            PECR => self.pecr,
            SR => {
                let busy = if self.busy > 0 {
                    self.busy -= 1;
                    SR_BSY
                } else {
                    0
                };
                self.sr | busy
            }
            OPTR => self.optr,
            _ => 0,
        }
    }

    fn write_register(&mut self, memory: &mut Memory, offset: u32, value: u32) {
        match offset {
            PECR => self.write_pecr(memory, value),
            PEKEYR | PRGKEYR | OPTKEYR => self.write_key(offset, value),
            SR => self.sr &= !(value & SR_CLEARABLE),
            _ => {}
        }
    }

    fn program_word(&mut self, memory: &mut Memory, addr: u32, value: u32) {
        let current = memory.read32(addr).unwrap_or(0);
        if current != 0 && value != 0 {
            self.sr |= SR_NOTZEROERR;
            return;
        }
        let _ = memory.write32(addr, value);
    }

    fn write_flash(&mut self, memory: &mut Memory, addr: u32, value: u32, width: u8) {
        if width != 4 {
            self.sr |= SR_SIZERR;
            return;
        }
        if self.pecr & (PECR_PELOCK | PECR_PRGLOCK) != 0 {
            self.sr |= SR_WRPERR;
            return;
        }
        if self.pecr & (PECR_ERASE | PECR_PROG) == PECR_ERASE | PECR_PROG {
            let page = addr & !(self.page_size - 1);
            memory.fill(page, self.page_size, 0);
            self.erase_triggers.push(addr);
            self.busy += self.busy_reads;
        } else if self.pecr & PECR_PROG != 0 {
            self.program_word(memory, addr, value);
            self.busy += self.busy_reads;
        } else {
            self.sr |= SR_WRPERR;
        }
    }

    fn write_eeprom(&mut self, memory: &mut Memory, addr: u32, value: u32, width: u8) {
        if self.pecr & PECR_PELOCK != 0 {
            self.sr |= SR_WRPERR;
            return;
        }
        if self.pecr & (PECR_ERASE | PECR_DATA) == PECR_ERASE | PECR_DATA {
            if width != 4 {
                self.sr |= SR_SIZERR;
                return;
            }
            memory.fill(addr & !3, 4, 0);
            self.erase_triggers.push(addr);
        } else if self.family == SimFamily::L1 || self.pecr & PECR_DATA != 0 {
            let _ = memory.write_le(addr, value, width);
        } else {
            self.sr |= SR_WRPERR;
            return;
        }
        self.busy += self.busy_reads;
    }

    fn write_option(&mut self, memory: &mut Memory, addr: u32, value: u32, width: u8) {
        if self.pecr & PECR_OPTLOCK != 0 {
            self.sr |= SR_WRPERR;
            return;
        }
        if width != 4 {
            self.sr |= SR_SIZERR;
            return;
        }
        let _ = memory.write32(addr, value);
        self.busy += self.busy_reads;
    }
}

fn complemented(low: u32) -> u32 {
    (low & 0xffff) | ((!low & 0xffff) << 16)
}

impl Device for Stm32lxDevice {
    fn read(&mut self, _mem: &mut Memory, addr: u32, _width: u8) -> Option<Result<u32>> {
        if addr >= self.base && addr < self.base + 0x20 {
            return Some(Ok(self.read_register(addr - self.base)));
        }
        if self.is_protected() && (self.in_flash(addr) || self.in_eeprom(addr)) {
            return Some(Err(Error::Transport));
        }
        None
    }

    fn write(&mut self, mem: &mut Memory, addr: u32, value: u32, width: u8) -> Option<Result<()>> {
        if addr >= self.base && addr < self.base + 0x20 {
            self.write_register(mem, addr - self.base, value);
        } else if self.in_flash(addr) {
            self.write_flash(mem, addr, value, width);
        } else if self.in_eeprom(addr) {
            self.write_eeprom(mem, addr, value, width);
        } else if self.in_options(addr) {
            self.write_option(mem, addr, value, width);
        } else {
            return None;
        }
        Some(Ok(()))
    }

    fn read_block(&mut self, _mem: &mut Memory, addr: u32, buf: &mut [u8]) -> Option<Result<()>> {
        if buf.is_empty() || !self.is_protected() {
            return None;
        }
        let last = addr.saturating_add(buf.len() as u32 - 1);
        if self.in_flash(addr) || self.in_eeprom(addr) || self.in_flash(last) {
            return Some(Err(Error::Transport));
        }
        None
    }

    fn write_block(&mut self, mem: &mut Memory, addr: u32, data: &[u8]) -> Option<Result<()>> {
        if !self.in_flash(addr) && !self.in_eeprom(addr) {
            return None;
        }
        if self.in_flash(addr) && self.pecr & PECR_FPRG != 0 {
            let half_page = self.page_size / 2;
            if addr % half_page != 0 || data.len() as u32 % half_page != 0 {
                self.sr |= SR_PGAERR;
                return Some(Ok(()));
            }
            for (index, word) in data.chunks_exact(4).enumerate() {
                let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                self.program_word(mem, addr + 4 * index as u32, value);
            }
            self.busy += self.busy_reads;
            return Some(Ok(()));
        }
        for (index, word) in data.chunks(4).enumerate() {
            let mut bytes = [0u8; 4];
            bytes[..word.len()].copy_from_slice(word);
            let value = u32::from_le_bytes(bytes);
            let at = addr + 4 * index as u32;
            if self.in_flash(at) {
                self.write_flash(mem, at, value, word.len() as u8);
            } else {
                self.write_eeprom(mem, at, value, word.len() as u8);
            }
        }
        Some(Ok(()))
    }

    fn reset(&mut self, mem: &mut Memory, _core: &mut Core) {
        self.pecr = PECR_LOCKS;
        self.sr = 0;
        self.busy = 0;
        self.pe_stage = 0;
        self.prg_stage = 0;
        self.opt_stage = 0;
        self.key_fault = false;
        self.optr = self.load_optr(mem);
    }

    fn take_link_drop(&mut self) -> bool {
        std::mem::take(&mut self.link_drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swdflash_core::target::Target;

    const L0_PECR: u32 = 0x4002_2004;
    const L0_PEKEYR: u32 = 0x4002_200c;
    const L0_PRGKEYR: u32 = 0x4002_2010;
    const L0_SR: u32 = 0x4002_2018;

    fn unlock(target: &mut SimTarget<Stm32lxDevice>) {
        target.write32(L0_PEKEYR, PEKEY[0]).unwrap();
        target.write32(L0_PEKEYR, PEKEY[1]).unwrap();
        target.write32(L0_PRGKEYR, PRGKEY[0]).unwrap();
        target.write32(L0_PRGKEYR, PRGKEY[1]).unwrap();
    }

    #[test]
    fn test_key_sequence_unlocks() {
        let mut target = Stm32lxConfig::l0_cat3().build();
        assert_eq!(target.read32(L0_PECR).unwrap() & PECR_LOCKS, PECR_LOCKS);
        unlock(&mut target);
        assert_eq!(target.read32(L0_PECR).unwrap() & PECR_LOCKS, PECR_OPTLOCK);
        target.write32(L0_PECR, PECR_PELOCK).unwrap();
        assert!(target.device.is_locked());
    }

    #[test]
    fn test_wrong_key_locks_until_reset() {
        let mut target = Stm32lxConfig::l0_cat3().build();
        target.write32(L0_PEKEYR, 0x1234_5678).unwrap();
        target.write32(L0_PEKEYR, PEKEY[0]).unwrap();
        target.write32(L0_PEKEYR, PEKEY[1]).unwrap();
        assert!(target.device.is_locked());
        target.reset().unwrap();
        unlock(&mut target);
        assert!(!target.device.is_locked());
    }

    #[test]
    fn test_page_erase_and_busy() {
        let mut target = Stm32lxConfig::l0_cat3().build();
        target.memory.fill(FLASH_BASE, 0x100, 0x5a);
        unlock(&mut target);
        target.write32(L0_PECR, PECR_ERASE | PECR_PROG).unwrap();
        target.write32(FLASH_BASE + 0x80, 0).unwrap();
        assert_eq!(target.read32(L0_SR).unwrap() & SR_BSY, SR_BSY);
        assert_eq!(target.read32(L0_SR).unwrap() & SR_BSY, SR_BSY);
        assert_eq!(target.read32(L0_SR).unwrap(), 0);
        assert_eq!(target.memory.slice(FLASH_BASE + 0x80, 0x80).unwrap(), &[0u8; 0x80][..]);
        assert_eq!(target.memory.read32(FLASH_BASE).unwrap(), 0x5a5a_5a5a);
    }

    #[test]
    fn test_locked_write_sets_wrperr() {
        let mut target = Stm32lxConfig::l0_cat3().build();
        target.write32(FLASH_BASE, 0x1234_5678).unwrap();
        assert_eq!(target.read32(L0_SR).unwrap(), SR_WRPERR);
        target.write32(L0_SR, SR_WRPERR).unwrap();
        assert_eq!(target.read32(L0_SR).unwrap(), 0);
        assert_eq!(target.memory.read32(FLASH_BASE).unwrap(), 0);
    }

    #[test]
    fn test_protected_part_blocks_reads() {
        let mut target = Stm32lxConfig::l0_cat5().protected(0x00).build();
        assert!(target.device.is_protected());
        assert_eq!(target.read32(FLASH_BASE), Err(Error::Transport));
        assert!(target.check_error());
        assert_eq!(target.read32(0x4002_201c).unwrap() & 0xff, 0x00);
    }
}
