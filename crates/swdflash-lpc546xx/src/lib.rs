//! swdflash-lpc546xx - LPC546xx NVM driver
//!
//! Flash on the LPC546xx cannot be programmed by poking controller
//! registers. The boot ROM exposes an IAP entry point instead: the driver
//! stages a call frame in SRAM0, points the halted core at the ROM and lets
//! it run until it returns into a breakpoint placed in the frame.
//!
//! Every erase starts with a reset so the ROM is unmapped from address 0
//! and the clocks are back at their reset values. A running watchdog is
//! stretched where possible and fed while the ROM works.

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

use alloc::vec::Vec;

use swdflash_core::command::{dispatch, Command, CommandInfo, Console};
use swdflash_core::driver::NvmDriver;
use swdflash_core::error::{Error, Result};
use swdflash_core::region::NvmRegion;
use swdflash_core::target::Target;

pub mod commands;
pub mod flash;
pub mod iap;
pub mod wdt;

pub use iap::{Iap, IapCommand, IapStatus};

use crate::flash::{SECTOR_SIZE, WRITE_SIZE};

/// SYSCON device id register
pub const CHIPID: u32 = 0x4000_0ff8;
/// Boot ROM word holding the IAP entry address
pub const IAP_ENTRY_LOCATION: u32 = 0x0300_0204;
/// SRAM0, the only bank enabled after reset
pub const IAP_RAM_BASE: u32 = 0x2000_0000;
/// Size of SRAM0
pub const IAP_RAM_SIZE: u32 = 0x1_0000;

/// One supported part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    /// SYSCON device id
    pub chip_id: u32,
    /// Part name
    pub name: &'static str,
    /// Flash size in bytes
    pub flash_size: u32,
}

const fn part(chip_id: u32, name: &'static str, flash_size: u32) -> Part {
    Part {
        chip_id,
        name,
        flash_size,
    }
}

/// Known parts
pub static PARTS: [Part; 11] = [
    part(0x7f95_4605, "LPC54605J256", 0x4_0000),
    part(0x7f95_4606, "LPC54606J256", 0x4_0000),
    part(0x7f95_4607, "LPC54607J256", 0x4_0000),
    part(0x7f95_4616, "LPC54616J256", 0x4_0000),
    part(0xfff5_4605, "LPC54605J512", 0x8_0000),
    part(0xfff5_4606, "LPC54606J512", 0x8_0000),
    part(0xfff5_4607, "LPC54607J512", 0x8_0000),
    part(0xfff5_4608, "LPC54608J512", 0x8_0000),
    part(0xfff5_4616, "LPC54616J512", 0x8_0000),
    part(0xfff5_4618, "LPC54618J512", 0x8_0000),
    part(0xfff5_4628, "LPC54628J512", 0x8_0000),
];

/// Look up a SYSCON device id
pub fn find_part(chip_id: u32) -> Option<&'static Part> {
    PARTS.iter().find(|p| p.chip_id == chip_id)
}

/// Probed LPC546xx device
pub struct Lpc546xx {
    part: &'static Part,
    iap: Iap,
    regions: Vec<NvmRegion>,
}

impl Lpc546xx {
    /// Driver for `part` calling the ROM at `iap_entry`
    pub fn new(part: &'static Part, iap_entry: u32) -> Result<Self> {
        let mut regions = Vec::new();
        regions.try_reserve_exact(1).map_err(|_| {
            log::error!("Out of memory while registering {} flash", part.name);
            Error::OutOfMemory
        })?;
        regions.push(NvmRegion::flash(0, part.flash_size, SECTOR_SIZE, WRITE_SIZE));
        Ok(Self {
            part,
            iap: Iap {
                entry: iap_entry,
                ram: IAP_RAM_BASE,
                msp: IAP_RAM_BASE + IAP_RAM_SIZE,
            },
            regions,
        })
    }

    /// Probed part
    pub fn part(&self) -> &'static Part {
        self.part
    }

    /// Flash size in bytes
    pub fn flash_size(&self) -> u32 {
        self.part.flash_size
    }

    /// Boot ROM call setup
    pub fn iap(&self) -> &Iap {
        &self.iap
    }
}

/// Probe for an LPC546xx
///
/// Returns `Ok(None)` when the device id belongs to some other part.
pub fn probe(target: &mut dyn Target) -> Result<Option<Lpc546xx>> {
    let chip_id = target.read32(CHIPID)?;
    let Some(part) = find_part(chip_id) else {
        return Ok(None);
    };
    let entry = target.read32(IAP_ENTRY_LOCATION)?;
    log::info!("{} with IAP entry at 0x{:08x}", part.name, entry);
    Lpc546xx::new(part, entry).map(Some)
}

impl NvmDriver for Lpc546xx {
    fn variant(&self) -> &str {
        self.part.name
    }

    fn regions(&self) -> &[NvmRegion] {
        &self.regions
    }

    fn erase(&mut self, target: &mut dyn Target, region: usize, addr: u32, len: u32) -> Result<()> {
        self.region(region)?.check_range(addr, len)?;
        flash::erase(target, &self.iap, addr, len)
    }

    fn write(&mut self, target: &mut dyn Target, region: usize, addr: u32, data: &[u8]) -> Result<()> {
        self.region(region)?.check_range(addr, data.len() as u32)?;
        flash::write(target, &self.iap, addr, data)
    }

    fn mass_erase(&mut self, target: &mut dyn Target) -> Result<()> {
        let region = self.region(0)?;
        flash::erase(target, &self.iap, region.start, region.length).map_err(|e| {
            log::error!("Error erasing flash: {}", e);
            e
        })
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
    use alloc::string::String;
    use alloc::vec;
    use swdflash_sim::lpc546xx::SRAM_BASE;
    use swdflash_sim::{Access, Lpc546xxConfig, Lpc546xxDevice, SimTarget};

    fn probed(config: Lpc546xxConfig) -> (SimTarget<Lpc546xxDevice>, Lpc546xx) {
        let mut target = config.build();
        let driver = probe(&mut target).unwrap().unwrap();
        target.clear_trace();
        (target, driver)
    }

    fn run(driver: &mut Lpc546xx, target: &mut SimTarget<Lpc546xxDevice>, line: &str) -> (bool, String) {
        let argv: Vec<&str> = line.split_whitespace().collect();
        let mut out = String::new();
        let ok = driver.run_command(target, &mut out, &argv).unwrap();
        (ok, out)
    }

    fn commands_issued(target: &SimTarget<Lpc546xxDevice>) -> Vec<u32> {
        target.device.calls.iter().map(|c| c.command).collect()
    }

    #[test]
    fn test_probe_part_table() {
        let (_, driver) = probed(Lpc546xxConfig::lpc54608());
        assert_eq!(driver.variant(), "LPC54608J512");
        assert_eq!(
            driver.regions(),
            &[NvmRegion::flash(0, 0x8_0000, 0x8000, 4096)]
        );
        assert_eq!(driver.iap().entry, 0x0300_0205);
        assert_eq!(driver.iap().msp, 0x2001_0000);

        let (_, small) = probed(Lpc546xxConfig::lpc54605_256());
        assert_eq!(small.variant(), "LPC54605J256");
        assert_eq!(small.flash_size(), 0x4_0000);
    }

    #[test]
    fn test_probe_unknown_part() {
        let mut config = Lpc546xxConfig::lpc54608();
        config.part_id = 0x1234_5678;
        let mut target = config.build();
        assert!(probe(&mut target).unwrap().is_none());
        // The ROM is not touched for a foreign part
        assert_eq!(target.count_reads(IAP_ENTRY_LOCATION), 0);
    }

    #[test]
    fn test_erase_runs_init_then_rom() {
        let (mut target, mut driver) = probed(Lpc546xxConfig::lpc54608());
        target.memory.fill(0x8000, 0x10000, 0x5a);
        driver.erase(&mut target, 0, 0x8000, 0x10000).unwrap();

        assert_eq!(target.trace()[0], Access::Reset);
        assert_eq!(target.trace()[1], Access::Resume { step: true });
        assert_eq!(target.count_writes(0x4000_0400, 0x1a), 1);
        assert_eq!(target.count_writes(0x4000_0280, 0), 1);
        assert_eq!(commands_issued(&target), vec![50, 52, 53]);
        assert_eq!(target.device.calls[1].params[..3], [1, 2, 12000]);
        assert_eq!(target.memory.read32(0x8000).unwrap(), 0xffff_ffff);
        assert_eq!(target.memory.read32(0x17ffc).unwrap(), 0xffff_ffff);
    }

    #[test]
    fn test_erase_stops_at_first_rom_error() {
        let (mut target, mut driver) = probed(Lpc546xxConfig::lpc54608());
        target.device.fail_command = Some((52, 11));
        assert_eq!(
            driver.erase(&mut target, 0, 0, 0x8000),
            Err(Error::Iap { status: 11 })
        );
        assert_eq!(commands_issued(&target), vec![50, 52]);
        assert_eq!(
            iap::error_status(&Error::Iap { status: 11 }),
            Some(IapStatus::Busy)
        );
    }

    #[test]
    fn test_erase_out_of_range() {
        let (mut target, mut driver) = probed(Lpc546xxConfig::lpc54605_256());
        assert_eq!(
            driver.erase(&mut target, 0, 0x4_0000, 0x8000),
            Err(Error::AddressOutOfBounds)
        );
        assert!(target.trace().is_empty());
    }

    #[test]
    fn test_write_patches_vector_checksum() {
        let (mut target, mut driver) = probed(Lpc546xxConfig::lpc54608());
        let image: Vec<u8> = (0..4096u32).map(|i| (i * 3) as u8).collect();
        driver.write(&mut target, 0, 0, &image).unwrap();

        let sum = (0..8)
            .map(|i| target.memory.read32(i * 4).unwrap())
            .fold(0u32, u32::wrapping_add);
        assert_eq!(sum, 0);
        assert_eq!(
            target.memory.slice(32, 4064).unwrap(),
            &image[32..]
        );
        assert_eq!(commands_issued(&target), vec![50, 51]);
        assert_eq!(
            target.device.calls[1].params[..3],
            [0, SRAM_BASE + 48, 4096]
        );
    }

    #[test]
    fn test_write_elsewhere_is_verbatim() {
        let (mut target, mut driver) = probed(Lpc546xxConfig::lpc54608());
        let image = vec![0x42u8; 8192 + 100];
        driver.write(&mut target, 0, 0x1_0000, &image).unwrap();

        assert_eq!(target.memory.slice(0x1_0000, image.len()).unwrap(), &image[..]);
        // Short tail is padded to the smallest program count
        assert_eq!(target.memory.read32(0x1_0000 + 8192 + 100).unwrap(), 0xffff_ffff);
        let counts: Vec<u32> = target
            .device
            .calls
            .iter()
            .filter(|c| c.command == 51)
            .map(|c| c.params[2])
            .collect();
        assert_eq!(counts, vec![4096, 4096, 256]);
    }

    #[test]
    fn test_write_unit_across_sector_boundary() {
        let (mut target, mut driver) = probed(Lpc546xxConfig::lpc54608());
        driver.erase(&mut target, 0, 0, 0x1_0000).unwrap();
        target.device.calls.clear();

        let image = [0x42u8; 4096];
        driver.write(&mut target, 0, 0x7f00, &image).unwrap();

        assert_eq!(target.memory.slice(0x7f00, image.len()).unwrap(), &image[..]);
        assert_eq!(commands_issued(&target), vec![50, 51]);
        // Both sectors the unit touches are prepared
        assert_eq!(target.device.calls[0].params[..2], [0, 1]);
    }

    #[test]
    fn test_write_rejects_misaligned() {
        let (mut target, mut driver) = probed(Lpc546xxConfig::lpc54608());
        assert_eq!(
            driver.write(&mut target, 0, 0x104, &[0; 16]),
            Err(Error::InvalidAlignment)
        );
        assert!(target.device.calls.is_empty());
    }

    #[test]
    fn test_mass_erase_covers_flash() {
        let (mut target, mut driver) = probed(Lpc546xxConfig::lpc54605_256());
        target.memory.fill(0x3_fff0, 0x10, 0);
        driver.mass_erase(&mut target).unwrap();
        assert_eq!(target.device.calls[0].params[..2], [0, 7]);
        assert_eq!(target.memory.read32(0x3_fffc).unwrap(), 0xffff_ffff);
    }

    #[test]
    fn test_read_partid_and_uid() {
        let (mut target, mut driver) = probed(Lpc546xxConfig::lpc54608());
        let (ok, out) = run(&mut driver, &mut target, "read_partid");
        assert!(ok);
        assert_eq!(out, "PART ID: 0xfff54608\n");

        let (ok, out) = run(&mut driver, &mut target, "read_uid");
        assert!(ok);
        assert_eq!(out, "UID: 0x67452301efcdab893c2d1e0f78695a4b\n");
    }

    #[test]
    fn test_erase_and_write_sector() {
        let (mut target, mut driver) = probed(Lpc546xxConfig::lpc54608());
        let (ok, _) = run(&mut driver, &mut target, "write_sector 2");
        assert!(ok);
        assert_eq!(target.memory.read32(0x1_0000).unwrap(), 0x0302_0100);
        assert_eq!(target.memory.read32(0x1_7ffc).unwrap(), 0xfffe_fdfc);

        let (ok, _) = run(&mut driver, &mut target, "erase_sector 0x2");
        assert!(ok);
        assert_eq!(target.memory.read32(0x1_0000).unwrap(), 0xffff_ffff);
    }

    #[test]
    fn test_sector_usage() {
        let (mut target, mut driver) = probed(Lpc546xxConfig::lpc54608());
        for line in ["erase_sector", "erase_sector 16", "write_sector x"] {
            let (ok, out) = run(&mut driver, &mut target, line);
            assert!(ok);
            assert!(out.starts_with("usage: monitor "), "{}", out);
        }
        assert!(target.trace().is_empty());
    }

    #[test]
    fn test_rom_failure_is_reported() {
        let (mut target, mut driver) = probed(Lpc546xxConfig::lpc54608());
        target.device.fail_command = Some((52, 9));
        let (ok, out) = run(&mut driver, &mut target, "erase_sector 1");
        assert!(!ok);
        assert_eq!(out, "erase failed: SECTOR_NOT_PREPARED_FOR_WRITE_OPERATION\n");
    }

    #[test]
    fn test_reset_commands() {
        let (mut target, mut driver) = probed(Lpc546xxConfig::lpc54608());
        let (ok, _) = run(&mut driver, &mut target, "reset");
        assert!(ok);
        assert_eq!(target.count_writes(0xe000_ed0c, 0x05fa_0004), 1);
        assert_eq!(target.device.resets, 1);

        let (ok, _) = run(&mut driver, &mut target, "reset_attach");
        assert!(ok);
        assert_eq!(target.device.resets, 2);
        assert!(target.core.attached);
        assert_eq!(driver.commands().len(), 6);
    }
}
