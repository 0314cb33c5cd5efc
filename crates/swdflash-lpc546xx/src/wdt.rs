//! Windowed watchdog keep-alive
//!
//! Once firmware has started the watchdog it cannot be stopped again. Long
//! boot ROM calls would trip it, so the period is stretched where the mode
//! register still allows it and the watchdog is fed while waiting.

use swdflash_core::error::Result;
use swdflash_core::target::Target;

/// Watchdog mode register
pub const WDT_MODE: u32 = 0x4000_c000;
/// Watchdog timeout constant
pub const WDT_TC: u32 = 0x4000_c004;
/// Watchdog feed register
pub const WDT_FEED: u32 = 0x4000_c008;

/// Largest timeout constant the counter takes
pub const WDT_PERIOD_MAX: u32 = 0x00ff_ffff;
/// Mode bit that freezes the timeout constant
pub const WDT_MODE_PROTECT: u32 = 1 << 4;

const FEED_FIRST: u32 = 0xaa;
const FEED_SECOND: u32 = 0xff;

/// Stretch the watchdog period to its maximum if it is running
///
/// A protected watchdog keeps its period and can only be fed.
pub fn set_period<T: Target + ?Sized>(target: &mut T) -> Result<()> {
    let mode = target.read32(WDT_MODE)?;
    if mode == 0 {
        return Ok(());
    }
    if mode & WDT_MODE_PROTECT != 0 {
        log::warn!("Watchdog period is protected, relying on feeds");
        return Ok(());
    }
    log::debug!("Extending watchdog period");
    target.write32(WDT_TC, WDT_PERIOD_MAX)
}

/// Feed the watchdog if it is running
pub fn kick<T: Target + ?Sized>(target: &mut T) -> Result<()> {
    if target.read32(WDT_MODE)? != 0 {
        target.write32(WDT_FEED, FEED_FIRST)?;
        target.write32(WDT_FEED, FEED_SECOND)?;
    }
    Ok(())
}
