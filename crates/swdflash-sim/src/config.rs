//! Emulated device configuration
//!
//! A simulated target can be picked by preset name or described in a TOML
//! file:
//!
//! ```toml
//! [device]
//! kind = "stm32l0"
//! part_id = 0x447
//! flash_size = "0x30000"
//! eeprom_size = 0x1800
//! read_protection = 1
//!
//! [watchdog]
//! mode = 0x13
//! timeout = 0x1000
//!
//! [faults]
//! stuck_program_lock = false
//! reload_drops_link = true
//! ```

use std::fs;
use std::path::Path;

use swdflash_core::target::Target;
use thiserror::Error;

use crate::lpc546xx::Lpc546xxConfig;
use crate::stm32lx::{Stm32lxConfig, RDP_LEVEL0, RDP_LEVEL2};

/// Errors from loading a simulator configuration
#[derive(Debug, Error)]
pub enum SimConfigError {
    /// The configuration file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The configuration is not valid TOML or has unknown keys
    #[error("invalid simulator configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// No preset with that name
    #[error("unknown simulated device '{0}'")]
    UnknownDevice(String),
    /// Read protection level outside 0..=2
    #[error("invalid read protection level {0}, expected 0, 1 or 2")]
    InvalidProtection(u8),
}

/// Device family of a simulated target
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// STM32L0 family
    Stm32l0,
    /// STM32L1 family
    Stm32l1,
    /// LPC546xx family
    Lpc546xx,
}

/// Top level of a simulator configuration file
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    /// Device description
    pub device: DeviceConfig,
    /// Watchdog state at power up (LPC546xx only)
    pub watchdog: Option<WatchdogConfig>,
    /// Injected faults
    #[serde(default)]
    pub faults: FaultConfig,
}

/// Device section
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// Family
    pub kind: DeviceKind,
    /// Device id reported by DBGMCU or SYSCON
    #[serde(default, deserialize_with = "deserialize_opt_hex_u32")]
    pub part_id: Option<u32>,
    /// Program flash size in bytes
    #[serde(default, deserialize_with = "deserialize_opt_hex_u32")]
    pub flash_size: Option<u32>,
    /// Data EEPROM size in bytes
    #[serde(default, deserialize_with = "deserialize_opt_hex_u32")]
    pub eeprom_size: Option<u32>,
    /// Read protection level (0, 1 or 2)
    #[serde(default)]
    pub read_protection: u8,
}

/// Watchdog section
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchdogConfig {
    /// MOD register value
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub mode: u32,
    /// TC register value
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub timeout: u32,
}

/// Faults section
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaultConfig {
    /// PRGLOCK never clears
    #[serde(default)]
    pub stuck_program_lock: bool,
    /// The debug link drops when protection regresses to level 0
    #[serde(default)]
    pub reload_drops_link: bool,
    /// Status reads an operation keeps BSY set for
    pub busy_reads: Option<u32>,
}

/// Deserialize a u32 that can be hex (0x...) or decimal
fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u32),
        Str(String),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => swdflash_core::command::parse_number(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid number: {}", s))),
    }
}

fn deserialize_opt_hex_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_hex_u32(deserializer).map(Some)
}

impl SimConfig {
    /// Look up a built-in device by name
    pub fn preset(name: &str) -> Result<Self, SimConfigError> {
        let (kind, part_id) = match name.to_ascii_lowercase().as_str() {
            "stm32l0" | "stm32l0-cat5" => (DeviceKind::Stm32l0, 0x447),
            "stm32l0-cat3" => (DeviceKind::Stm32l0, 0x417),
            "stm32l1" => (DeviceKind::Stm32l1, 0x427),
            "lpc546xx" | "lpc54608" | "lpc54608j512" => (DeviceKind::Lpc546xx, 0xfff5_4608),
            "lpc54606j512" => (DeviceKind::Lpc546xx, 0xfff5_4606),
            "lpc54605" | "lpc54605j256" => (DeviceKind::Lpc546xx, 0x7f95_4605),
            _ => return Err(SimConfigError::UnknownDevice(name.to_string())),
        };
        Ok(Self {
            device: DeviceConfig {
                kind,
                part_id: Some(part_id),
                flash_size: None,
                eeprom_size: None,
                read_protection: 0,
            },
            watchdog: None,
            faults: FaultConfig::default(),
        })
    }

    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, SimConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| SimConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, SimConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Override the read protection level
    pub fn with_read_protection(mut self, level: u8) -> Self {
        self.device.read_protection = level;
        self
    }

    fn rdp_byte(&self) -> Result<u8, SimConfigError> {
        match self.device.read_protection {
            0 => Ok(RDP_LEVEL0),
            1 => Ok(0x00),
            2 => Ok(RDP_LEVEL2),
            level => Err(SimConfigError::InvalidProtection(level)),
        }
    }

    fn stm32lx(&self, base: Stm32lxConfig) -> Result<Stm32lxConfig, SimConfigError> {
        let device = &self.device;
        Ok(Stm32lxConfig {
            part_id: device.part_id.map_or(base.part_id, |id| id as u16),
            flash_size: device.flash_size.unwrap_or(base.flash_size),
            eeprom_size: device.eeprom_size.unwrap_or(base.eeprom_size),
            read_protection: self.rdp_byte()?,
            ..base
        })
    }

    /// Build the emulated target
    pub fn build(&self) -> Result<Box<dyn Target>, SimConfigError> {
        log::info!("Simulating {:?} device", self.device.kind);
        match self.device.kind {
            DeviceKind::Stm32l0 | DeviceKind::Stm32l1 => {
                let base = match (self.device.kind, self.device.part_id) {
                    (DeviceKind::Stm32l1, _) => Stm32lxConfig::l1(),
                    (_, Some(0x417)) => Stm32lxConfig::l0_cat3(),
                    _ => Stm32lxConfig::l0_cat5(),
                };
                let mut target = self.stm32lx(base)?.build();
                target.device.stuck_program_lock = self.faults.stuck_program_lock;
                target.device.reload_drops_link = self.faults.reload_drops_link;
                if let Some(reads) = self.faults.busy_reads {
                    target.device.busy_reads = reads;
                }
                Ok(Box::new(target))
            }
            DeviceKind::Lpc546xx => {
                // J256 parts carry 0x7f in the top byte of their id
                let base = match self.device.part_id {
                    Some(id) if id >> 24 == 0x7f => Lpc546xxConfig::lpc54605_256(),
                    _ => Lpc546xxConfig::lpc54608(),
                };
                let config = Lpc546xxConfig {
                    part_id: self.device.part_id.unwrap_or(base.part_id),
                    flash_size: self.device.flash_size.unwrap_or(base.flash_size),
                    ..base
                };
                let mut target = config.build();
                if let Some(watchdog) = &self.watchdog {
                    target.device.enable_watchdog(watchdog.mode, watchdog.timeout);
                }
                if let Some(reads) = self.faults.busy_reads {
                    target.device.call_polls = reads;
                }
                Ok(Box::new(target))
            }
        }
    }
}
