//! swdflash-stm32lx - STM32L0/L1 NVM driver
//!
//! Programs flash, data EEPROM and option bytes of STM32L0 and STM32L1
//! parts by sequencing the NVM controller registers over the debug link.
//! No code runs on the target.
//!
//! Flash and data EEPROM of these parts read as zero once erased. Flash is
//! erased per page and programmed in half-page bursts; data EEPROM is
//! erased and written per word.
//!
//! A read protected part is still probed. It attaches in a reduced mode
//! and its mass erase is replaced by the protection regression sequence,
//! which is the only way back to a debuggable device.

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

use alloc::string::String;
use alloc::vec::Vec;

use swdflash_core::command::{dispatch, Command, CommandInfo, Console};
use swdflash_core::driver::NvmDriver;
use swdflash_core::error::{Error, Result};
use swdflash_core::region::{NvmRegion, RegionKind};
use swdflash_core::target::Target;

pub mod commands;
pub mod family;
pub mod nvm;
pub mod options;
pub mod regs;

pub use family::{Family, FamilyInfo};
pub use options::ReadProtection;

use crate::regs::{
    DBGMCU_APB1FZ_IWDG, DBGMCU_APB1FZ_WWDG, DBGMCU_CR_LOW_POWER, EEPROM_BASE, FLASH_BASE,
    L0_DBGMCU_APB1FZ, L0_DBGMCU_CR, L0_FLASH_SIZE_REG,
};

/// L1 program flash size
const L1_FLASH_SIZE: u32 = 0x8_0000;

/// Probed STM32L0/L1 device
pub struct Stm32lx {
    family: Family,
    regions: Vec<NvmRegion>,
    variant: String,
    protected_attach: bool,
    recovery_erase: bool,
}

impl Stm32lx {
    /// Device variant
    pub fn family(&self) -> Family {
        self.family
    }
}

fn alloc_failed<E>(_: E) -> Error {
    log::error!("Out of memory while registering STM32Lx regions");
    Error::OutOfMemory
}

/// Keep debug alive in low power modes and freeze the watchdogs while halted
fn configure_debug(target: &mut dyn Target) -> Result<()> {
    target.write32(L0_DBGMCU_CR, DBGMCU_CR_LOW_POWER)?;
    target.write32(L0_DBGMCU_APB1FZ, DBGMCU_APB1FZ_WWDG | DBGMCU_APB1FZ_IWDG)
}

fn flash_region(start: u32, length: u32, info: &FamilyInfo) -> NvmRegion {
    NvmRegion::flash(start, length, info.page_size, info.write_size()).with_erased(0)
}

fn l0_regions(target: &mut dyn Target, family: Family) -> Result<Vec<NvmRegion>> {
    let info = family.info();
    let flash_size = target.read16(L0_FLASH_SIZE_REG)? as u32 * 1024;
    log::debug!("{} flash size {} KiB", info.name, flash_size / 1024);

    let mut regions = Vec::new();
    regions
        .try_reserve_exact(info.banks as usize + 1)
        .map_err(alloc_failed)?;
    let bank_size = flash_size / info.banks;
    for bank in 0..info.banks {
        regions.push(flash_region(FLASH_BASE + bank * bank_size, bank_size, info));
    }
    regions.push(NvmRegion::data_flash(EEPROM_BASE, info.eeprom_size, 4));
    Ok(regions)
}

fn l1_regions(family: Family) -> Result<Vec<NvmRegion>> {
    let mut regions = Vec::new();
    regions.try_reserve_exact(1).map_err(alloc_failed)?;
    regions.push(flash_region(FLASH_BASE, L1_FLASH_SIZE, family.info()));
    Ok(regions)
}

/// Probe for an STM32L0/L1 with DBGMCU device id `part_id`
///
/// Returns `Ok(None)` when the id belongs to some other part.
pub fn probe(target: &mut dyn Target, part_id: u16) -> Result<Option<Stm32lx>> {
    let Some(family) = Family::from_part_id(part_id) else {
        return Ok(None);
    };
    let info = family.info();

    if info.low_power_debug {
        configure_debug(target)?;
    }
    let regions = if family.is_l0() {
        l0_regions(target, family)?
    } else {
        l1_regions(family)?
    };

    let protection = options::read_protection(target, info.controller)?;
    let mut variant = String::new();
    variant.try_reserve(info.name.len() + 12).map_err(alloc_failed)?;
    variant.push_str(info.name);
    if protection.is_protected() {
        variant.push_str(" (protected)");
        log::info!("{} is read protected (level {})", info.name, protection.level());
    }

    Ok(Some(Stm32lx {
        family,
        regions,
        variant,
        protected_attach: protection.is_protected(),
        recovery_erase: protection.is_protected(),
    }))
}

impl NvmDriver for Stm32lx {
    fn variant(&self) -> &str {
        &self.variant
    }

    fn regions(&self) -> &[NvmRegion] {
        &self.regions
    }

    fn erase(&mut self, target: &mut dyn Target, region: usize, addr: u32, len: u32) -> Result<()> {
        let region = self.region(region)?;
        region.check_range(addr, len)?;
        let controller = self.family.info().controller;
        match region.kind {
            RegionKind::Flash => nvm::flash_erase(target, controller, &region, addr, len),
            RegionKind::DataFlash => nvm::eeprom_erase(target, controller, &region, addr, len),
        }
    }

    fn write(&mut self, target: &mut dyn Target, region: usize, addr: u32, data: &[u8]) -> Result<()> {
        let region = self.region(region)?;
        region.check_range(addr, data.len() as u32)?;
        let info = self.family.info();
        match region.kind {
            RegionKind::Flash => {
                nvm::flash_write(target, info.controller, region.write_size, addr, data)
            }
            RegionKind::DataFlash => nvm::eeprom_write(target, info, addr, data),
        }
    }

    fn mass_erase(&mut self, target: &mut dyn Target) -> Result<()> {
        if self.recovery_erase {
            return options::protected_mass_erase(target, self.family.info().controller);
        }
        for index in 0..self.regions.len() {
            let region = self.regions[index];
            self.erase(target, index, region.start, region.length)?;
        }
        Ok(())
    }

    fn attach(&mut self, target: &mut dyn Target) -> Result<()> {
        if self.protected_attach {
            // Only the first attach is reduced, a later one goes the normal way
            self.protected_attach = false;
            log::warn!(
                "Attached in protected mode, please issue 'monitor erase_mass' to regain chip access"
            );
            return Ok(());
        }
        target.attach()?;
        if self.family.info().low_power_debug {
            configure_debug(target)?;
        }
        Ok(())
    }

    fn detach(&mut self, target: &mut dyn Target) {
        if self.family.info().low_power_debug {
            if let Err(e) = target.write32(L0_DBGMCU_CR, 0) {
                log::warn!("Failed to restore DBGMCU: {}", e);
            }
        }
        target.detach();
    }

    fn commands(&self) -> Vec<CommandInfo> {
        commands::COMMANDS.iter().map(Command::info).collect()
    }

    fn run_command(
        &mut self,
        target: &mut dyn Target,
        console: &mut dyn Console,
        argv: &[&str],
    ) -> Option<bool> {
        dispatch(&commands::COMMANDS, self, target, console, argv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{format, vec};
    use crate::regs::{Sr, L0_CONTROLLER, OPTION_BASE};
    use swdflash_sim::{Access, SimTarget, Stm32lxConfig, Stm32lxDevice};

    fn unprobed(family: Family, regions: Vec<NvmRegion>) -> Stm32lx {
        Stm32lx {
            family,
            regions,
            variant: String::from(family.info().name),
            protected_attach: false,
            recovery_erase: false,
        }
    }

    fn probed(config: Stm32lxConfig) -> (SimTarget<Stm32lxDevice>, Stm32lx) {
        let part_id = config.part_id;
        let mut target = config.build();
        let driver = probe(&mut target, part_id).unwrap().unwrap();
        target.clear_trace();
        (target, driver)
    }

    fn run(driver: &mut Stm32lx, target: &mut SimTarget<Stm32lxDevice>, line: &str) -> (bool, String) {
        let argv: Vec<&str> = line.split_whitespace().collect();
        let mut out = String::new();
        let ok = driver.run_command(target, &mut out, &argv).unwrap();
        (ok, out)
    }

    fn controller_touched(target: &SimTarget<Stm32lxDevice>) -> bool {
        let base = target.device.controller_base();
        target.wrote_in(base, base + 0x20)
    }

    #[test]
    fn test_probe_l0_regions() {
        let mut target = Stm32lxConfig::l0_cat5().build();
        let driver = probe(&mut target, 0x447).unwrap().unwrap();
        assert_eq!(driver.variant(), "STM32L0");
        let regions = driver.regions();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0], flash_region(FLASH_BASE, 0x1_8000, Family::L0Cat5.info()));
        assert_eq!(regions[1].start, 0x0801_8000);
        assert_eq!(regions[2].kind, RegionKind::DataFlash);
        assert_eq!(regions[2].length, 6144);
        assert_eq!(target.memory.read32(L0_DBGMCU_CR).unwrap(), DBGMCU_CR_LOW_POWER);
        assert_eq!(
            target.memory.read32(L0_DBGMCU_APB1FZ).unwrap(),
            DBGMCU_APB1FZ_WWDG | DBGMCU_APB1FZ_IWDG
        );
    }

    #[test]
    fn test_data_flash_follows_category() {
        let mut target = Stm32lxConfig::l0_cat3().build();
        let driver = probe(&mut target, 0x417).unwrap().unwrap();
        let data = driver.regions().last().unwrap();
        assert_eq!(data.kind, RegionKind::DataFlash);
        assert_eq!(data.length, 0x800);
        assert!(!data.contains_range(EEPROM_BASE + 0x7fc, 8));
    }

    #[test]
    fn test_probe_l1_and_unknown() {
        let mut target = Stm32lxConfig::l1().build();
        assert!(probe(&mut target, 0x450).unwrap().is_none());
        let driver = probe(&mut target, 0x427).unwrap().unwrap();
        assert_eq!(driver.variant(), "STM32L1");
        assert_eq!(driver.regions().len(), 1);
        assert_eq!(driver.regions()[0].block_size, 0x100);
        assert_eq!(driver.regions()[0].write_size, 0x80);
    }

    #[test]
    fn test_erase_leaves_region_erased() {
        for config in [Stm32lxConfig::l0_cat3(), Stm32lxConfig::l1()] {
            let (mut target, mut driver) = probed(config);
            let region = driver.regions()[0];
            target.memory.fill(region.start, region.length, 0x5a);

            driver.erase(&mut target, 0, region.start, region.length).unwrap();
            let flash = target.memory.slice(region.start, region.length as usize).unwrap();
            assert!(flash.iter().all(|&b| b == region.erased));
            assert!(target.device.is_locked());
        }
    }

    #[test]
    fn test_partial_erase_keeps_neighbours() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat3());
        target.memory.fill(FLASH_BASE, 0x400, 0x5a);
        driver.erase(&mut target, 0, FLASH_BASE + 0x100, 0x100).unwrap();
        assert_eq!(target.memory.read32(FLASH_BASE + 0xfc).unwrap(), 0x5a5a_5a5a);
        assert_eq!(target.memory.read32(FLASH_BASE + 0x100).unwrap(), 0);
        assert_eq!(target.memory.read32(FLASH_BASE + 0x1fc).unwrap(), 0);
        assert_eq!(target.memory.read32(FLASH_BASE + 0x200).unwrap(), 0x5a5a_5a5a);
        assert_eq!(target.device.erase_triggers.len(), 2);
    }

    #[test]
    fn test_write_reads_back() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat3());
        let data: Vec<u8> = (0..0x100u32).map(|i| (i * 7 + 1) as u8).collect();
        driver.erase(&mut target, 0, FLASH_BASE, 0x100).unwrap();
        driver.write(&mut target, 0, FLASH_BASE + 0x40, &data).unwrap();

        let mut back = vec![0u8; data.len()];
        target.read_bytes(FLASH_BASE + 0x40, &mut back).unwrap();
        assert_eq!(back, data);
        assert!(target.device.is_locked());
    }

    #[test]
    fn test_misaligned_write_rejected() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat3());
        assert_eq!(
            driver.write(&mut target, 0, FLASH_BASE + 0x20, &[0u8; 0x40]),
            Err(Error::InvalidAlignment)
        );
        assert_eq!(
            driver.write(&mut target, 0, FLASH_BASE + 0xfff0, &[0u8; 0x40]),
            Err(Error::AddressOutOfBounds)
        );
        assert!(target.trace().is_empty());
    }

    #[test]
    fn test_eeprom_region_roundtrip() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat5());
        target.memory.fill(EEPROM_BASE, 0x10, 0xff);
        driver.erase(&mut target, 2, EEPROM_BASE, 8).unwrap();
        assert_eq!(target.memory.slice(EEPROM_BASE, 10).unwrap(), &[0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff]);

        driver.write(&mut target, 2, EEPROM_BASE + 4, &[0xde, 0xad, 0xbe]).unwrap();
        assert_eq!(target.memory.slice(EEPROM_BASE + 4, 3).unwrap(), &[0xde, 0xad, 0xbe]);
        assert!(target.device.is_locked());
    }

    #[test]
    fn test_unlock_failure_skips_triggers() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat3());
        target.device.stuck_program_lock = true;
        target.memory.fill(FLASH_BASE, 0x100, 0x5a);

        assert_eq!(driver.erase(&mut target, 0, FLASH_BASE, 0x80), Err(Error::UnlockFailed));
        assert_eq!(
            driver.write(&mut target, 0, FLASH_BASE, &[0u8; 0x40]),
            Err(Error::UnlockFailed)
        );
        assert!(target.device.erase_triggers.is_empty());
        assert!(!target.wrote_in(FLASH_BASE, FLASH_BASE + 0x1_0000));
        assert_eq!(target.memory.read32(FLASH_BASE).unwrap(), 0x5a5a_5a5a);
        assert!(target.device.is_locked());
    }

    #[test]
    fn test_erase_polls_once_after_all_triggers() {
        let config = Stm32lxConfig {
            flash_size: 0x4_0000,
            ..Stm32lxConfig::l0_cat5()
        };
        let mut target = config.build();
        let region = NvmRegion::flash(FLASH_BASE, 0x4_0000, 0x8000, 0x40).with_erased(0);
        let mut driver = unprobed(Family::L0Cat5, vec![region]);

        driver.erase(&mut target, 0, FLASH_BASE, 0x4_0000).unwrap();
        assert_eq!(target.device.erase_triggers.len(), 8);

        let sr = Family::L0Cat5.info().controller.sr();
        let trace = target.trace();
        let is_trigger = |a: &Access| matches!(a, Access::Write { addr, .. } if *addr < FLASH_BASE + 0x4_0000 && *addr >= FLASH_BASE);
        let first = trace.iter().position(is_trigger).unwrap();
        let last = trace.iter().rposition(is_trigger).unwrap();
        assert!(!trace[first..last]
            .iter()
            .any(|a| matches!(a, Access::Read { addr, .. } if *addr == sr)));
        assert!(trace[last..]
            .iter()
            .any(|a| matches!(a, Access::Read { addr, .. } if *addr == sr)));
    }

    #[test]
    fn test_progress_only_for_whole_region() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat3());
        target.device.set_busy(2000);
        driver.erase(&mut target, 0, FLASH_BASE, 0x80).unwrap();
        assert_eq!(target.progress_marks(), 0);

        let region = driver.regions()[0];
        target.device.set_busy(2000);
        driver.erase(&mut target, 0, region.start, region.length).unwrap();
        assert!(target.progress_marks() >= 4);
    }

    #[test]
    fn test_stale_error_flags_fail_write_until_erase() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat3());
        target.device.set_status(Sr::PGAERR.bits());
        assert_eq!(
            driver.write(&mut target, 0, FLASH_BASE, &[1u8; 0x40]),
            Err(Error::HardwareError {
                status: Sr::PGAERR.bits()
            })
        );
        assert!(target.device.is_locked());

        driver.erase(&mut target, 0, FLASH_BASE, 0x80).unwrap();
        driver.write(&mut target, 0, FLASH_BASE, &[1u8; 0x40]).unwrap();
    }

    #[test]
    fn test_program_over_data_reports_hardware_error() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat3());
        target.memory.fill(FLASH_BASE, 0x40, 0x11);
        let err = driver.write(&mut target, 0, FLASH_BASE, &[0x22u8; 0x40]);
        assert_eq!(err, Err(Error::HardwareError { status: Sr::NOTZEROERR.bits() }));
        assert!(target.device.is_locked());
    }

    #[test]
    fn test_option_write_encodes_complement() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat5());
        for value in [0x0000u32, 0x1234, 0xffff] {
            let (ok, out) = run(&mut driver, &mut target, &format!("option write 0x1ff80008 0x{:x}", value));
            assert!(ok, "{}", out);
            let expected = (value & 0xffff) | ((!value & 0xffff) << 16);
            assert_eq!(target.memory.read32(OPTION_BASE + 8).unwrap(), expected);
            assert!(out.contains("0x1ff80008: "));
            assert!(out.lines().last().unwrap().starts_with("OPTR: "));
        }
        assert!(target.device.is_locked());
    }

    #[test]
    fn test_option_raw_and_show() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l1());
        let (ok, out) = run(&mut driver, &mut target, "option raw 0x1ff8001c 0x12345678");
        assert!(ok);
        assert_eq!(target.memory.read32(OPTION_BASE + 0x1c).unwrap(), 0x1234_5678);
        assert!(out.contains("0x1ff8001c: 0x5678 0x1234 ERR"));
        assert!(out.contains("BOR_LEV"));

        target.clear_trace();
        let (ok, out) = run(&mut driver, &mut target, "opt SH");
        assert!(ok);
        assert_eq!(out.lines().count(), 9);
        assert!(!controller_touched(&target));
    }

    #[test]
    fn test_usage_errors_touch_nothing() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat5());
        for line in [
            "option",
            "option write 0x1ff80002 0x1",
            "option write 0x1ff8000c 0x1",
            "option write 0x1ff80008 0x10000",
            "option erase 0x1ff80008 0x1",
            "option raw 0x1ff80008 banana",
            "eeprom",
            "eeprom word 0x08080002 1",
            "eeprom halfword 0x08080001 1",
            "eeprom byte 0x08081800 1",
            "eeprom byte 0x08000000 1",
            "eeprom dword 0x08080000 1",
        ] {
            let (ok, out) = run(&mut driver, &mut target, line);
            assert!(ok, "{}", line);
            assert!(out.contains("usage:"), "{}: {}", line, out);
        }
        assert!(target.trace().is_empty());
        assert!(!controller_touched(&target));

        let (_, out) = run(&mut driver, &mut target, "eeprom word 0x08080002 1");
        assert!(out.starts_with("Refusing to do unaligned write"));
    }

    #[test]
    fn test_eeprom_command_writes() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat5());
        let (ok, out) = run(&mut driver, &mut target, "eeprom h 0x08080002 0x1beef");
        assert!(ok);
        assert_eq!(out, "writing halfword 0x08080002 with 0xbeef\n");
        assert_eq!(target.memory.read32(EEPROM_BASE).unwrap(), 0xbeef_0000);

        let (ok, _) = run(&mut driver, &mut target, "eeprom word 0x08080004 0xcafef00d");
        assert!(ok);
        assert_eq!(target.memory.read32(EEPROM_BASE + 4).unwrap(), 0xcafe_f00d);
        assert!(target.device.is_locked());
    }

    #[test]
    fn test_eeprom_command_unlock_failure() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat5());
        target.device.stuck_program_lock = true;
        let (ok, out) = run(&mut driver, &mut target, "eeprom byte 0x08080000 1");
        assert!(!ok);
        assert!(out.contains("unable to unlock EEPROM"));
        assert!(target.device.is_locked());
    }

    #[test]
    fn test_commands_listed() {
        let driver = unprobed(Family::L1, Vec::new());
        let names: Vec<&str> = driver.commands().iter().map(|c| c.name).collect();
        assert_eq!(names, ["option", "eeprom"]);
        assert_eq!(driver.region(0), Err(Error::NoRegion));
    }

    #[test]
    fn test_protected_attach_then_recover() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat5().protected(0x00));
        assert_eq!(driver.variant(), "STM32L0 (protected)");

        driver.attach(&mut target).unwrap();
        assert!(!target.core.attached);
        driver.attach(&mut target).unwrap();
        assert!(target.core.attached);

        driver.mass_erase(&mut target).unwrap();
        assert_eq!(target.memory.read32(OPTION_BASE).unwrap(), 0xff55_00aa);
        assert_eq!(target.device.reloads, 2);
        assert!(!target.device.is_protected());
        assert!(target.device.is_locked());
        assert_eq!(target.read32(FLASH_BASE).unwrap(), 0);
    }

    #[test]
    fn test_recovery_survives_link_drop() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l1().protected(0x00));
        assert_eq!(driver.variant(), "STM32L1 (protected)");
        target.device.reload_drops_link = true;
        target.device.reload_busy_reads = 50;

        assert_eq!(driver.mass_erase(&mut target), Ok(()));
        assert!(target.link_down());
        target.reconnect();
        assert!(target.device.is_locked());
        assert!(!target.device.is_protected());
    }

    #[test]
    fn test_detach_restores_dbgmcu() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat3());
        driver.attach(&mut target).unwrap();
        driver.detach(&mut target);
        assert_eq!(target.memory.read32(L0_DBGMCU_CR).unwrap(), 0);
        assert!(!target.core.attached);
        assert_eq!(target.count_writes(L0_DBGMCU_CR, 0), 1);
    }

    #[test]
    fn test_mass_erase_all_regions() {
        let (mut target, mut driver) = probed(Stm32lxConfig::l0_cat3());
        target.memory.fill(FLASH_BASE, 0x1_0000, 0x77);
        target.memory.fill(EEPROM_BASE, 0x800, 0x77);
        driver.mass_erase(&mut target).unwrap();
        assert!(target.memory.slice(FLASH_BASE, 0x1_0000).unwrap().iter().all(|&b| b == 0));
        assert!(target.memory.slice(EEPROM_BASE, 0x800).unwrap().iter().all(|&b| b == 0));
        assert_eq!(L0_CONTROLLER, target.device.controller_base());
    }
}
