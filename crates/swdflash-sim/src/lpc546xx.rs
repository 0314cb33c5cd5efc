//! LPC546xx boot ROM model
//!
//! Flash on these parts is only reachable through the IAP entry of the boot
//! ROM. The model watches for the core being resumed at that entry, decodes
//! the command block r0 points at, executes it against the flash array and
//! stores status and results where r1 points, then halts on the return
//! breakpoint. The windowed watchdog is emulated far enough to observe feeds.

use swdflash_core::error::{Error, Result};
use swdflash_core::target::CoreRegister;

use crate::{Core, Device, Memory, SimTarget};

/// Location of the IAP entry pointer in the boot ROM
pub const IAP_ENTRY_LOCATION: u32 = 0x0300_0204;
/// SRAM of the emulated part
pub const SRAM_BASE: u32 = 0x2000_0000;
/// SRAM size (SRAM0 through SRAM3)
pub const SRAM_SIZE: u32 = 0x2_8000;
/// SYSCON device id register
pub const CHIPID: u32 = 0x4000_0ff8;
/// Flash sector size
pub const SECTOR_SIZE: u32 = 0x8000;

const ROM_BASE: u32 = 0x0300_0000;
const SYSCON_BASE: u32 = 0x4000_0000;
const WDT_MODE: u32 = 0x4000_c000;
const WDT_TC: u32 = 0x4000_c004;
const WDT_FEED: u32 = 0x4000_c008;
const WDT_MODE_PROTECT: u32 = 1 << 4;
const AIRCR: u32 = 0xe000_ed0c;

const CMD_SUCCESS: u32 = 0;
const INVALID_COMMAND: u32 = 1;
const SRC_ADDR_ERROR: u32 = 2;
const DST_ADDR_ERROR: u32 = 3;
const COUNT_ERROR: u32 = 6;
const INVALID_SECTOR: u32 = 7;
const SECTOR_NOT_BLANK: u32 = 8;
const SECTOR_NOT_PREPARED: u32 = 9;

/// One executed IAP command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IapCall {
    /// Command code
    pub command: u32,
    /// Argument words
    pub params: [u32; 5],
    /// Status the ROM returned
    pub status: u32,
}

/// Configuration of an emulated LPC546xx
#[derive(Debug, Clone)]
pub struct Lpc546xxConfig {
    /// SYSCON device id
    pub part_id: u32,
    /// Flash size in bytes
    pub flash_size: u32,
    /// Unique id words
    pub uid: [u32; 4],
    /// Address the IAP entry pointer holds
    pub iap_entry: u32,
}

impl Lpc546xxConfig {
    /// LPC54608J512
    pub fn lpc54608() -> Self {
        Self {
            part_id: 0xfff5_4608,
            flash_size: 0x8_0000,
            uid: [0x0123_4567, 0x89ab_cdef, 0x0f1e_2d3c, 0x4b5a_6978],
            iap_entry: 0x0300_0205,
        }
    }

    /// LPC54605J256
    pub fn lpc54605_256() -> Self {
        Self {
            part_id: 0x7f95_4605,
            flash_size: 0x4_0000,
            ..Self::lpc54608()
        }
    }

    /// Build the target
    pub fn build(self) -> SimTarget<Lpc546xxDevice> {
        let mut memory = Memory::default();
        memory.map(0, self.flash_size, 0xff);
        memory.map(ROM_BASE, 0x1000, 0);
        memory.map(SRAM_BASE, SRAM_SIZE, 0);
        memory.map(SYSCON_BASE, 0x1000, 0);
        let _ = memory.write32(IAP_ENTRY_LOCATION, self.iap_entry);
        let _ = memory.write32(CHIPID, self.part_id);
        SimTarget::new(Lpc546xxDevice::new(self), memory)
    }
}

/// Emulated LPC546xx boot ROM and watchdog
#[derive(Debug)]
pub struct Lpc546xxDevice {
    config: Lpc546xxConfig,
    prepared: Option<(u32, u32)>,
    running: Option<u32>,
    wdt_mode: u32,
    wdt_tc: u32,
    feed_armed: bool,
    /// Halt polls an IAP call takes before it returns
    pub call_polls: u32,
    /// Force a status code for one command
    pub fail_command: Option<(u32, u32)>,
    /// Every IAP command executed
    pub calls: Vec<IapCall>,
    /// Completed watchdog feed sequences
    pub feeds: u32,
    /// Number of resets (debugger or AIRCR)
    pub resets: u32,
}

impl Lpc546xxDevice {
    fn new(config: Lpc546xxConfig) -> Self {
        Self {
            config,
            prepared: None,
            running: None,
            wdt_mode: 0,
            wdt_tc: 0xff,
            feed_armed: false,
            call_polls: 0,
            fail_command: None,
            calls: Vec::new(),
            feeds: 0,
            resets: 0,
        }
    }

    /// Start the watchdog the way firmware would
    pub fn enable_watchdog(&mut self, mode: u32, tc: u32) {
        self.wdt_mode = mode;
        self.wdt_tc = tc;
    }

    /// Watchdog mode register
    pub fn wdt_mode(&self) -> u32 {
        self.wdt_mode
    }

    /// Watchdog timeout constant
    pub fn wdt_tc(&self) -> u32 {
        self.wdt_tc
    }

    fn sectors(&self) -> u32 {
        self.config.flash_size / SECTOR_SIZE
    }

    fn sector_range(&self, start: u32, end: u32) -> Option<(u32, u32)> {
        (start <= end && end < self.sectors()).then_some((start * SECTOR_SIZE, (end + 1) * SECTOR_SIZE))
    }

    fn is_prepared(&self, start: u32, end: u32) -> bool {
        matches!(self.prepared, Some((s, e)) if s <= start && end <= e)
    }

    fn execute(&mut self, mem: &mut Memory, command: u32, params: [u32; 5]) -> (u32, [u32; 4]) {
        let mut result = [0u32; 4];
        if let Some((failing, status)) = self.fail_command {
            if failing == command {
                return (status, result);
            }
        }
        let status = match command {
            // Prepare sectors for write
            50 => match self.sector_range(params[0], params[1]) {
                Some(_) => {
                    self.prepared = Some((params[0], params[1]));
                    CMD_SUCCESS
                }
                None => INVALID_SECTOR,
            },
            // Copy RAM to flash
            51 => {
                let (dst, src, len) = (params[0], params[1], params[2]);
                if ![256, 512, 1024, 4096].contains(&len) {
                    COUNT_ERROR
                } else if dst % 256 != 0 || dst + len > self.config.flash_size {
                    DST_ADDR_ERROR
                } else if src % 4 != 0 || !mem.is_mapped(src, len as usize) {
                    SRC_ADDR_ERROR
                } else if !self.is_prepared(dst / SECTOR_SIZE, (dst + len - 1) / SECTOR_SIZE) {
                    SECTOR_NOT_PREPARED
                } else {
                    let data = mem.slice(src, len as usize).map(<[u8]>::to_vec).unwrap_or_default();
                    if let Some(flash) = mem.slice_mut(dst, len as usize) {
                        for (cell, byte) in flash.iter_mut().zip(data) {
                            *cell &= byte;
                        }
                    }
                    self.prepared = None;
                    CMD_SUCCESS
                }
            }
            // Erase sectors
            52 => match self.sector_range(params[0], params[1]) {
                None => INVALID_SECTOR,
                Some(_) if !self.is_prepared(params[0], params[1]) => SECTOR_NOT_PREPARED,
                Some((start, end)) => {
                    mem.fill(start, end - start, 0xff);
                    self.prepared = None;
                    CMD_SUCCESS
                }
            },
            // Blank check sectors
            53 => match self.sector_range(params[0], params[1]) {
                None => INVALID_SECTOR,
                Some((start, end)) => {
                    let area = mem.slice(start, (end - start) as usize).unwrap_or_default();
                    match area.iter().position(|&b| b != 0xff) {
                        Some(offset) => {
                            let word = offset & !3;
                            result[0] = start + word as u32;
                            result[1] = mem.read32(start + word as u32).unwrap_or(0);
                            SECTOR_NOT_BLANK
                        }
                        None => CMD_SUCCESS,
                    }
                }
            },
            // Read part id
            54 => {
                result[0] = self.config.part_id;
                CMD_SUCCESS
            }
            // Read UID
            58 => {
                result = self.config.uid;
                CMD_SUCCESS
            }
            _ => INVALID_COMMAND,
        };
        (status, result)
    }

    fn finish_call(&mut self, mem: &mut Memory, core: &mut Core) {
        let config = core.reg(CoreRegister::R(0));
        let status_at = core.reg(CoreRegister::R(1));
        let mut params = [0u32; 5];
        let command = mem.read32(config).unwrap_or(u32::MAX);
        for (index, param) in params.iter_mut().enumerate() {
            *param = mem.read32(config + 4 + 4 * index as u32).unwrap_or(0);
        }

        let (status, result) = self.execute(mem, command, params);
        log::debug!("sim: IAP command {} -> status {}", command, status);
        self.calls.push(IapCall {
            command,
            params,
            status,
        });
        let _ = mem.write32(status_at, status);
        for (index, value) in result.iter().enumerate() {
            let _ = mem.write32(status_at + 4 + 4 * index as u32, *value);
        }

        // Return into the breakpoint the caller staged at LR
        let lr = core.reg(CoreRegister::Lr);
        core.regs.insert(CoreRegister::Pc, lr & !1);
        core.halted = true;
    }
}

impl Device for Lpc546xxDevice {
    fn read(&mut self, _mem: &mut Memory, addr: u32, _width: u8) -> Option<Result<u32>> {
        match addr {
            WDT_MODE => Some(Ok(self.wdt_mode)),
            WDT_TC => Some(Ok(self.wdt_tc)),
            WDT_FEED => Some(Ok(0)),
            AIRCR => Some(Ok(0xfa05_0000)),
            _ => None,
        }
    }

    fn write(&mut self, _mem: &mut Memory, addr: u32, value: u32, _width: u8) -> Option<Result<()>> {
        match addr {
            // Enable and reset bits can only be set
            WDT_MODE => self.wdt_mode |= value & 0x3f,
            WDT_TC => {
                if self.wdt_mode & WDT_MODE_PROTECT == 0 {
                    self.wdt_tc = value & 0x00ff_ffff;
                }
            }
            WDT_FEED => match value {
                0xaa => self.feed_armed = true,
                0xff if self.feed_armed => {
                    self.feed_armed = false;
                    self.feeds += 1;
                }
                _ => self.feed_armed = false,
            },
            AIRCR => {
                if value == 0x05fa_0004 {
                    self.resets += 1;
                    self.wdt_mode = 0;
                }
            }
            _ if addr < self.config.flash_size => return Some(Err(Error::Transport)),
            _ => return None,
        }
        Some(Ok(()))
    }

    fn write_block(&mut self, _mem: &mut Memory, addr: u32, _data: &[u8]) -> Option<Result<()>> {
        (addr < self.config.flash_size).then_some(Err(Error::Transport))
    }

    fn resume(&mut self, mem: &mut Memory, core: &mut Core) {
        let pc = core.reg(CoreRegister::Pc);
        if pc & !1 != self.config.iap_entry & !1 {
            // Nothing to run: the model parks the core right away
            core.halted = true;
            return;
        }
        let msp = core.reg(CoreRegister::Msp);
        if !(SRAM_BASE..=SRAM_BASE + SRAM_SIZE).contains(&msp) {
            log::warn!("sim: IAP entered with stack at 0x{:08x}", msp);
        }
        if self.call_polls == 0 {
            self.finish_call(mem, core);
        } else {
            core.halted = false;
            self.running = Some(self.call_polls);
        }
    }

    fn poll(&mut self, mem: &mut Memory, core: &mut Core) {
        match self.running {
            Some(0) | None => {
                self.running = None;
                self.finish_call(mem, core);
            }
            Some(left) => self.running = Some(left - 1),
        }
    }

    fn reset(&mut self, _mem: &mut Memory, _core: &mut Core) {
        self.resets += 1;
        self.prepared = None;
        self.running = None;
        self.wdt_mode = 0;
        self.wdt_tc = 0xff;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swdflash_core::target::Target;

    fn call(target: &mut SimTarget<Lpc546xxDevice>, command: u32, params: &[u32]) -> u32 {
        let frame = SRAM_BASE;
        target.write32(frame + 4, command).unwrap();
        for (index, param) in params.iter().enumerate() {
            target.write32(frame + 8 + 4 * index as u32, *param).unwrap();
        }
        target.write_core_reg(CoreRegister::R(0), frame + 4).unwrap();
        target.write_core_reg(CoreRegister::R(1), frame + 28).unwrap();
        target.write_core_reg(CoreRegister::Lr, frame | 1).unwrap();
        target.write_core_reg(CoreRegister::Pc, 0x0300_0205).unwrap();
        target.halt_resume(false).unwrap();
        while !target.halt_poll().unwrap() {}
        target.read32(frame + 28).unwrap()
    }

    #[test]
    fn test_erase_requires_prepare() {
        let mut target = Lpc546xxConfig::lpc54608().build();
        target.memory.fill(0, 0x10, 0);
        assert_eq!(call(&mut target, 52, &[0, 0, 12000]), SECTOR_NOT_PREPARED);
        assert_eq!(call(&mut target, 50, &[0, 0]), CMD_SUCCESS);
        assert_eq!(call(&mut target, 52, &[0, 0, 12000]), CMD_SUCCESS);
        assert_eq!(call(&mut target, 53, &[0, 0]), CMD_SUCCESS);
        assert_eq!(target.memory.read32(0).unwrap(), 0xffff_ffff);
    }

    #[test]
    fn test_blank_check_reports_offset() {
        let mut target = Lpc546xxConfig::lpc54608().build();
        target.memory.fill(0x8010, 4, 0x12);
        assert_eq!(call(&mut target, 53, &[0, 1]), SECTOR_NOT_BLANK);
        assert_eq!(target.read32(SRAM_BASE + 32).unwrap(), 0x8010);
        assert_eq!(call(&mut target, 53, &[0, 16]), INVALID_SECTOR);
    }

    #[test]
    fn test_part_id_and_unknown_command() {
        let mut target = Lpc546xxConfig::lpc54608().build();
        target.device.call_polls = 3;
        assert_eq!(call(&mut target, 54, &[]), CMD_SUCCESS);
        assert_eq!(target.read32(SRAM_BASE + 32).unwrap(), 0xfff5_4608);
        assert_eq!(call(&mut target, 99, &[]), INVALID_COMMAND);
        assert_eq!(target.device.calls.len(), 2);
    }

    #[test]
    fn test_watchdog_feed_and_protect() {
        let mut target = Lpc546xxConfig::lpc54608().build();
        target.write32(WDT_FEED, 0xaa).unwrap();
        target.write32(WDT_FEED, 0xff).unwrap();
        target.write32(WDT_FEED, 0xff).unwrap();
        assert_eq!(target.device.feeds, 1);

        target.device.enable_watchdog(1 | WDT_MODE_PROTECT, 0x1000);
        target.write32(WDT_TC, 0xff_ffff).unwrap();
        assert_eq!(target.device.wdt_tc(), 0x1000);
    }

    #[test]
    fn test_direct_flash_write_faults() {
        let mut target = Lpc546xxConfig::lpc54608().build();
        assert_eq!(target.write32(0x100, 0), Err(Error::Transport));
        assert!(target.check_error());
    }
}
