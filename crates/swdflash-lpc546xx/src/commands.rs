//! Monitor commands

use alloc::vec::Vec;

use swdflash_core::command::{parse_number, Command, Console};
use swdflash_core::error::Error;
use swdflash_core::target::{Target, CORTEXM_AIRCR, CORTEXM_AIRCR_SYSRESETREQ};

use crate::flash::{self, SECTOR_SIZE};
use crate::iap::{error_status, IapCommand};
use crate::Lpc546xx;

/// Monitor command table
pub static COMMANDS: [Command<Lpc546xx>; 6] = [
    Command {
        name: "erase_sector",
        handler: cmd_erase_sector,
        help: "Erase a sector by number",
    },
    Command {
        name: "read_partid",
        handler: cmd_read_partid,
        help: "Read out the 32-bit part ID using IAP.",
    },
    Command {
        name: "read_uid",
        handler: cmd_read_uid,
        help: "Read out the 16-byte UID.",
    },
    Command {
        name: "reset_attach",
        handler: cmd_reset_attach,
        help: "Reset target. Reset debug registers. Re-attach debugger. This restores \
               the chip to the very start of program execution, after the ROM bootloader.",
    },
    Command {
        name: "reset",
        handler: cmd_reset,
        help: "Reset target",
    },
    Command {
        name: "write_sector",
        handler: cmd_write_sector,
        help: "Write incrementing data 8-bit values across a previously erased sector",
    },
];

fn report(out: &mut dyn Console, what: &str, error: Error) {
    match error_status(&error) {
        Some(status) => writeln!(out, "{} failed: {}", what, status),
        None => writeln!(out, "{} failed: {}", what, error),
    }
}

/// Sector number argument, or `None` after printing the usage
fn sector_arg(driver: &Lpc546xx, out: &mut dyn Console, argv: &[&str]) -> Option<u32> {
    let sectors = driver.flash_size() / SECTOR_SIZE;
    match argv.get(1).and_then(|arg| parse_number(arg)) {
        Some(sector) if sector < sectors => Some(sector),
        _ => {
            writeln!(out, "usage: monitor {} <sector>", argv[0]);
            writeln!(out, "  <sector> must be below {}", sectors);
            None
        }
    }
}

fn cmd_erase_sector(driver: &mut Lpc546xx, target: &mut dyn Target, out: &mut dyn Console, argv: &[&str]) -> bool {
    let Some(sector) = sector_arg(driver, out, argv) else {
        return true;
    };
    match flash::erase(target, driver.iap(), sector * SECTOR_SIZE, 1) {
        Ok(()) => true,
        Err(e) => {
            report(out, "erase", e);
            false
        }
    }
}

fn cmd_write_sector(driver: &mut Lpc546xx, target: &mut dyn Target, out: &mut dyn Console, argv: &[&str]) -> bool {
    let Some(sector) = sector_arg(driver, out, argv) else {
        return true;
    };
    let addr = sector * SECTOR_SIZE;
    if let Err(e) = flash::erase(target, driver.iap(), addr, 1) {
        report(out, "erase", e);
        return false;
    }
    let pattern: Vec<u8> = (0..SECTOR_SIZE).map(|i| i as u8).collect();
    match flash::write(target, driver.iap(), addr, &pattern) {
        Ok(()) => true,
        Err(e) => {
            report(out, "write", e);
            false
        }
    }
}

fn cmd_read_partid(driver: &mut Lpc546xx, target: &mut dyn Target, out: &mut dyn Console, _argv: &[&str]) -> bool {
    match driver.iap().call(target, IapCommand::PartId, &[]) {
        Ok(result) => {
            writeln!(out, "PART ID: 0x{:08x}", result[0]);
            true
        }
        Err(e) => {
            report(out, "read_partid", e);
            false
        }
    }
}

fn cmd_read_uid(driver: &mut Lpc546xx, target: &mut dyn Target, out: &mut dyn Console, _argv: &[&str]) -> bool {
    match driver.iap().call(target, IapCommand::ReadUid, &[]) {
        Ok(result) => {
            write!(out, "UID: 0x");
            for byte in result.iter().flat_map(|word| word.to_le_bytes()) {
                write!(out, "{:02x}", byte);
            }
            writeln!(out);
            true
        }
        Err(e) => {
            report(out, "read_uid", e);
            false
        }
    }
}

fn cmd_reset_attach(_driver: &mut Lpc546xx, target: &mut dyn Target, out: &mut dyn Console, _argv: &[&str]) -> bool {
    match flash::reset_attach(target) {
        Ok(()) => true,
        Err(e) => {
            report(out, "reset_attach", e);
            false
        }
    }
}

fn cmd_reset(_driver: &mut Lpc546xx, target: &mut dyn Target, out: &mut dyn Console, _argv: &[&str]) -> bool {
    // Resets everything except debug, the ROM stays mapped at 0
    match target.write32(CORTEXM_AIRCR, CORTEXM_AIRCR_SYSRESETREQ) {
        Ok(()) => true,
        Err(e) => {
            report(out, "reset", e);
            false
        }
    }
}
