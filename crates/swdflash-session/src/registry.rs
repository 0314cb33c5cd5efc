//! Probe registry and driver selection
//!
//! This module opens debug probes by name and picks the NVM driver that
//! recognises the attached device. Drivers are tried in a fixed order and
//! each one reads the identification register of its own family.

use std::collections::HashMap;

use swdflash_core::driver::NvmDriver;
use swdflash_core::error::Error;
use swdflash_core::target::Target;

use crate::error::{Result, SessionError};

/// DBGMCU_IDCODE on STM32L0 (APB)
pub const L0_DBGMCU_IDCODE: u32 = 0x4001_5800;
/// DBGMCU_IDCODE on STM32L1 (PPB)
pub const L1_DBGMCU_IDCODE: u32 = 0xe004_2000;

const DEV_ID_MASK: u32 = 0xfff;

/// Parsed probe parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeParams {
    /// Probe name
    pub name: String,
    /// Key-value parameters
    pub params: HashMap<String, String>,
}

/// Parse a probe string into name and parameters
///
/// Format: "name" or "name:key1=value1,key2=value2"
///
/// # Example
/// ```ignore
/// let params = parse_probe_params("sim:device=stm32l1,protected=1")?;
/// assert_eq!(params.name, "sim");
/// assert_eq!(params.params.get("device"), Some(&"stm32l1".to_string()));
/// ```
pub fn parse_probe_params(s: &str) -> Result<ProbeParams> {
    let (name, opts_str) = s.split_once(':').unwrap_or((s, ""));

    let mut params = HashMap::new();
    if !opts_str.is_empty() {
        for opt in opts_str.split(',') {
            if let Some((key, value)) = opt.split_once('=') {
                params.insert(key.to_string(), value.to_string());
            } else {
                return Err(SessionError::InvalidParameter(opt.to_string()));
            }
        }
    }

    Ok(ProbeParams {
        name: name.to_string(),
        params,
    })
}

/// Open the debug target behind a probe
pub fn open_target(params: &ProbeParams) -> Result<Box<dyn Target>> {
    match params.name.as_str() {
        #[cfg(feature = "sim")]
        "sim" | "emulator" => open_sim(params),

        _ => Err(SessionError::UnknownProbe(params.name.clone())),
    }
}

#[cfg(feature = "sim")]
fn open_sim(params: &ProbeParams) -> Result<Box<dyn Target>> {
    use swdflash_sim::SimConfig;

    let mut config = match (params.params.get("config"), params.params.get("device")) {
        (Some(path), _) => {
            log::info!("Loading simulated device from {}", path);
            SimConfig::from_toml_file(path)?
        }
        (None, Some(device)) => SimConfig::preset(device)?,
        (None, None) => SimConfig::preset("stm32l0")?,
    };
    if let Some(level) = params.params.get("protected") {
        let level = level.parse().map_err(|_| SessionError::InvalidValue {
            key: "protected".to_string(),
            value: level.clone(),
        })?;
        config = config.with_read_protection(level);
    }
    Ok(config.build()?)
}

/// Read an identification register, treating a link fault as "absent"
fn read_id(target: &mut dyn Target, addr: u32) -> Result<Option<u32>> {
    match target.read32(addr) {
        Ok(value) => Ok(Some(value)),
        Err(Error::Transport) => {
            // Clear the sticky error so the next family starts clean
            target.check_error();
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Find the driver for the attached device
pub fn probe_driver(target: &mut dyn Target) -> Result<Box<dyn NvmDriver>> {
    for idcode in [L0_DBGMCU_IDCODE, L1_DBGMCU_IDCODE] {
        let Some(value) = read_id(target, idcode)? else {
            continue;
        };
        let part_id = (value & DEV_ID_MASK) as u16;
        log::debug!("DBGMCU_IDCODE at 0x{:08x}: 0x{:08x}", idcode, value);
        if let Some(driver) = swdflash_stm32lx::probe(target, part_id)? {
            log::info!("Found: {}", driver.variant());
            return Ok(Box::new(driver));
        }
    }

    match swdflash_lpc546xx::probe(target) {
        Ok(Some(driver)) => {
            log::info!("Found: {}", driver.variant());
            return Ok(Box::new(driver));
        }
        Ok(None) => {}
        Err(Error::Transport) => {
            target.check_error();
        }
        Err(e) => return Err(e.into()),
    }

    Err(SessionError::NoDevice)
}

/// Information about a probe
pub struct ProbeInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all available probes (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_probes() -> Vec<ProbeInfo> {
    let mut probes = Vec::new();

    #[cfg(feature = "sim")]
    probes.push(ProbeInfo {
        name: "sim",
        aliases: &["emulator"],
        description: "Emulated target (device=<preset>, protected=<0|1|2>, config=<file.toml>)",
    });

    probes
}

/// Generate a short list of probe names for CLI help
pub fn probe_names_short() -> String {
    let probes = available_probes();
    if probes.is_empty() {
        return "none (recompile with features)".to_string();
    }
    let names: Vec<&str> = probes.iter().map(|p| p.name).collect();
    names.join(", ")
}

/// Information about a driver family
pub struct DriverInfo {
    /// Family name
    pub name: &'static str,
    /// Supported parts
    pub parts: &'static str,
    /// How the family is programmed
    pub description: &'static str,
}

/// Every driver family, in probe order
pub fn available_drivers() -> Vec<DriverInfo> {
    vec![
        DriverInfo {
            name: "stm32lx",
            parts: "STM32L0 (cat. 1/2/3/5), STM32L1",
            description: "NVM controller register sequencing, data EEPROM, option bytes",
        },
        DriverInfo {
            name: "lpc546xx",
            parts: "LPC54605/06/07/08/16/18/28",
            description: "Boot ROM IAP calls with watchdog keep-alive",
        },
    ]
}
