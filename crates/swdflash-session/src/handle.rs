//! Session - debug target plus the driver that owns its NVM
//!
//! A session is opened from a probe string, selects the driver once and
//! keeps it for its whole lifetime. The driver's attach runs on open and
//! its detach when the session is dropped.

use swdflash_core::command::{CommandInfo, Console};
use swdflash_core::driver::NvmDriver;
use swdflash_core::region::NvmRegion;
use swdflash_core::target::Target;

use crate::error::{Result, SessionError};
use crate::image::{self, WriteProgress, WriteStats};
use crate::registry::{open_target, parse_probe_params, probe_driver};

/// Monitor commands every session offers
pub const GENERIC_COMMANDS: [CommandInfo; 2] = [
    CommandInfo {
        name: "help",
        help: "Display help for monitor commands",
    },
    CommandInfo {
        name: "erase_mass",
        help: "Erase whole device flash",
    },
];

/// Debug session handle
pub struct Session {
    target: Box<dyn Target>,
    driver: Box<dyn NvmDriver>,
    attached: bool,
}

impl Session {
    /// Open a probe, identify the device and attach
    ///
    /// # Example
    /// ```ignore
    /// let mut session = Session::open("sim:device=stm32l1")?;
    /// println!("{}", session.variant());
    /// ```
    pub fn open(probe: &str) -> Result<Self> {
        let params = parse_probe_params(probe)?;
        let mut target = open_target(&params)?;
        let driver = probe_driver(target.as_mut())?;
        Self::attach(target, driver)
    }

    /// Attach `driver` to an already opened target
    pub fn attach(mut target: Box<dyn Target>, mut driver: Box<dyn NvmDriver>) -> Result<Self> {
        driver.attach(target.as_mut())?;
        Ok(Self {
            target,
            driver,
            attached: true,
        })
    }

    /// Device identity
    pub fn variant(&self) -> &str {
        self.driver.variant()
    }

    /// NVM regions of the device
    pub fn regions(&self) -> &[NvmRegion] {
        self.driver.regions()
    }

    /// Generic and device specific monitor commands
    pub fn commands(&self) -> Vec<CommandInfo> {
        let mut commands = GENERIC_COMMANDS.to_vec();
        commands.extend(self.driver.commands());
        commands
    }

    /// Erase `[addr, addr + len)`, widened to whole blocks
    pub fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        let (index, region) = image::locate(self.driver.regions(), addr, len)?;
        let (start, end) = image::block_span(&region, addr, len);
        if start != addr || end - start != len {
            log::warn!(
                "Erasing 0x{:08x}..0x{:08x} to cover whole blocks",
                start,
                end
            );
        }
        self.driver
            .erase(self.target.as_mut(), index, start, end - start)?;
        Ok(())
    }

    /// Erase every NVM region (or recover a protected device)
    pub fn mass_erase(&mut self) -> Result<()> {
        self.driver.mass_erase(self.target.as_mut())?;
        Ok(())
    }

    /// Read target memory
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.target.read_bytes(addr, buf)?;
        Ok(())
    }

    /// Program an image, erasing only what changes
    pub fn write_image(
        &mut self,
        addr: u32,
        data: &[u8],
        progress: &mut dyn WriteProgress,
    ) -> Result<WriteStats> {
        image::program(
            self.target.as_mut(),
            self.driver.as_mut(),
            addr,
            data,
            progress,
        )
    }

    /// Compare target memory with `data`
    pub fn verify(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut actual = vec![0u8; data.len()];
        self.read(addr, &mut actual)?;
        match actual.iter().zip(data).position(|(a, b)| a != b) {
            Some(offset) => Err(SessionError::VerifyFailed {
                addr: addr + offset as u32,
            }),
            None => Ok(()),
        }
    }

    /// Run one monitor command line
    ///
    /// Generic commands are matched by exact name first, then the driver's
    /// table, then generic abbreviations. `Ok(false)` means the command ran
    /// and failed.
    pub fn monitor(&mut self, line: &str, console: &mut dyn Console) -> Result<bool> {
        let argv: Vec<&str> = line.split_whitespace().collect();
        let Some(&name) = argv.first() else {
            return Ok(true);
        };

        if let Some(command) = GENERIC_COMMANDS.iter().find(|c| c.name == name) {
            return Ok(self.run_generic(command.name, console));
        }
        if let Some(ok) = self
            .driver
            .run_command(self.target.as_mut(), console, &argv)
        {
            return Ok(ok);
        }
        if let Some(command) = GENERIC_COMMANDS.iter().find(|c| c.name.starts_with(name)) {
            return Ok(self.run_generic(command.name, console));
        }
        Err(SessionError::UnknownCommand(name.to_string()))
    }

    fn run_generic(&mut self, name: &str, console: &mut dyn Console) -> bool {
        match name {
            "help" => {
                writeln!(console, "General commands:");
                for command in &GENERIC_COMMANDS {
                    writeln!(console, "\t{} -- {}", command.name, command.help);
                }
                let specific = self.driver.commands();
                if !specific.is_empty() {
                    writeln!(console, "{} specific commands:", self.driver.variant());
                    for command in specific {
                        writeln!(console, "\t{} -- {}", command.name, command.help);
                    }
                }
                true
            }
            "erase_mass" => match self.mass_erase() {
                Ok(()) => {
                    writeln!(console, "Mass erase complete");
                    true
                }
                Err(e) => {
                    writeln!(console, "Mass erase failed: {}", e);
                    false
                }
            },
            _ => false,
        }
    }

    /// Detach from the device, the session is unusable afterwards
    pub fn detach(&mut self) {
        if self.attached {
            self.attached = false;
            self.driver.detach(self.target.as_mut());
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::NoProgress;

    fn open(device: &str) -> Session {
        Session::open(&format!("sim:device={}", device)).unwrap()
    }

    fn monitor(session: &mut Session, line: &str) -> (Result<bool>, String) {
        let mut out = String::new();
        let result = session.monitor(line, &mut out);
        (result, out)
    }

    #[test]
    fn test_write_image_and_verify() {
        let mut session = open("stm32l0-cat3");
        let image: Vec<u8> = (1..=200u8).collect();
        let stats = session
            .write_image(0x0800_0010, &image, &mut NoProgress)
            .unwrap();
        assert!(stats.flash_modified);
        assert_eq!(stats.erases_performed, 2);
        assert_eq!(stats.bytes_changed, 200);
        session.verify(0x0800_0010, &image).unwrap();

        // Same content again leaves the flash alone
        let again = session
            .write_image(0x0800_0010, &image, &mut NoProgress)
            .unwrap();
        assert!(!again.flash_modified);
        assert_eq!(again.bytes_changed, 0);
    }

    #[test]
    fn test_write_image_keeps_block_neighbours() {
        let mut session = open("stm32l0-cat3");
        session
            .write_image(0x0800_0000, &[0x11; 0x80], &mut NoProgress)
            .unwrap();
        session
            .write_image(0x0800_0040, &[0x22; 0x10], &mut NoProgress)
            .unwrap();

        let mut block = [0u8; 0x80];
        session.read(0x0800_0000, &mut block).unwrap();
        assert!(block[..0x40].iter().all(|&b| b == 0x11));
        assert!(block[0x40..0x50].iter().all(|&b| b == 0x22));
        assert!(block[0x50..].iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_write_eeprom_region() {
        let mut session = open("stm32l0");
        let data = [0xde, 0xad, 0xbe, 0xef, 0x01, 0x02];
        session
            .write_image(0x0808_0002, &data, &mut NoProgress)
            .unwrap();
        session.verify(0x0808_0002, &data).unwrap();
    }

    #[test]
    fn test_write_image_lpc() {
        let mut session = open("lpc54608");
        let image = vec![0x5a; 5000];
        let stats = session
            .write_image(0x8000, &image, &mut NoProgress)
            .unwrap();
        assert_eq!(stats.erases_performed, 1);
        // Only the two units holding data are programmed
        assert_eq!(stats.bytes_written, 8192);
        session.verify(0x8000, &image).unwrap();
    }

    #[test]
    fn test_verify_reports_first_difference() {
        let mut session = open("stm32l0-cat3");
        assert!(matches!(
            session.verify(0x0800_0000, &[0, 0, 7]),
            Err(SessionError::VerifyFailed { addr: 0x0800_0002 })
        ));
    }

    #[test]
    fn test_range_errors() {
        let mut session = open("stm32l0-cat3");
        assert!(matches!(
            session.erase(0x0801_0000, 0x80),
            Err(SessionError::OutOfRange { .. })
        ));
        assert!(matches!(
            session.write_image(0x2000_0000, &[1], &mut NoProgress),
            Err(SessionError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_erase_widens_to_blocks() {
        let mut session = open("stm32l0-cat3");
        session
            .write_image(0x0800_0000, &[0x33; 0x100], &mut NoProgress)
            .unwrap();
        session.erase(0x0800_0010, 4).unwrap();

        let mut data = [0xffu8; 0x100];
        session.read(0x0800_0000, &mut data).unwrap();
        assert!(data[..0x80].iter().all(|&b| b == 0));
        assert!(data[0x80..].iter().all(|&b| b == 0x33));
    }

    #[test]
    fn test_monitor_dispatch() {
        let mut session = open("stm32l0");
        let (result, out) = monitor(&mut session, "help");
        assert!(result.unwrap());
        assert!(out.contains("\terase_mass -- Erase whole device flash"));
        assert!(out.contains("STM32L0 specific commands:"));
        assert!(out.contains("\toption -- "));

        let (result, out) = monitor(&mut session, "opt show");
        assert!(result.unwrap());
        assert!(out.contains("OPTR: "));

        let (result, _) = monitor(&mut session, "frobnicate");
        assert!(matches!(result, Err(SessionError::UnknownCommand(name)) if name == "frobnicate"));

        let (result, out) = monitor(&mut session, "   ");
        assert!(result.unwrap());
        assert!(out.is_empty());
    }

    #[test]
    fn test_monitor_lpc_commands() {
        let mut session = open("lpc54608");
        let (result, out) = monitor(&mut session, "read_partid");
        assert!(result.unwrap());
        assert_eq!(out, "PART ID: 0xfff54608\n");

        // Abbreviations reach the driver before generic commands
        let (result, out) = monitor(&mut session, "erase");
        assert!(result.unwrap());
        assert!(out.starts_with("usage: monitor erase <sector>"));
        assert_eq!(session.commands().len(), 8);
    }

    #[test]
    fn test_protected_recovery_via_monitor() {
        let mut session = Session::open("sim:device=stm32l0,protected=1").unwrap();
        assert_eq!(session.variant(), "STM32L0 (protected)");
        let (result, out) = monitor(&mut session, "erase_mass");
        assert!(result.unwrap());
        assert_eq!(out, "Mass erase complete\n");
    }

    #[test]
    fn test_detach_restores_debug_config() {
        let mut session = open("stm32l0");
        session.detach();
        let mut cr = [0xffu8; 4];
        session.read(0x4001_5804, &mut cr).unwrap();
        assert_eq!(cr, [0; 4]);
        // A second detach is a no-op
        session.detach();
    }

    #[test]
    fn test_open_from_config_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[device]\nkind = \"stm32l1\"\npart_id = \"0x436\"").unwrap();
        let probe = format!("sim:config={}", file.path().display());
        let session = Session::open(&probe).unwrap();
        assert_eq!(session.variant(), "STM32L1");
        assert_eq!(session.regions().len(), 1);
    }
}
