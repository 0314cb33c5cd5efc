//! Monitor commands
//!
//! Arguments are validated before any register is touched, so a usage
//! error never leaves the controller unlocked or half configured.

use swdflash_core::command::{matches_keyword, parse_number, Command, Console};
use swdflash_core::error::Error;
use swdflash_core::target::Target;

use crate::nvm::{eeprom_write_one, obl_launch, option_write, DataWidth};
use crate::options::{is_option_addr, report, OptionWord};
use crate::regs::{EEPROM_BASE, OPTION_BASE};
use crate::Stm32lx;

/// Monitor command table
pub static COMMANDS: [Command<Stm32lx>; 2] = [
    Command {
        name: "option",
        handler: cmd_option,
        help: "Manipulate option bytes",
    },
    Command {
        name: "eeprom",
        handler: cmd_eeprom,
        help: "Manipulate EEPROM (NVM data) memory",
    },
];

enum OptionAction {
    Show,
    Launch,
    Write { addr: u32, value: u32, raw: bool },
}

fn parse_option_args(driver: &Stm32lx, argv: &[&str]) -> Option<OptionAction> {
    match argv {
        [_, action] if matches_keyword(action, "show") => Some(OptionAction::Show),
        [_, action] if matches_keyword(action, "obl_launch") => Some(OptionAction::Launch),
        [_, action, addr, value] => {
            let raw = matches_keyword(action, "raw");
            if !raw && !matches_keyword(action, "write") {
                return None;
            }
            let addr = parse_number(addr)?;
            let value = parse_number(value)?;
            if !is_option_addr(driver.family().info(), addr) {
                return None;
            }
            let value = if raw {
                value
            } else {
                OptionWord::encode(u16::try_from(value).ok()?).0
            };
            Some(OptionAction::Write { addr, value, raw })
        }
        _ => None,
    }
}

fn option_usage(driver: &Stm32lx, out: &mut dyn Console) {
    let info = driver.family().info();
    writeln!(out, "usage: monitor option [ARGS]");
    writeln!(out, "  show                   - Show options in NVM and as loaded");
    writeln!(out, "  obl_launch             - Reload options from NVM");
    writeln!(out, "  write <addr> <value16> - Set option half-word; complement computed");
    writeln!(out, "  raw <addr> <value32>   - Set option word");
    writeln!(
        out,
        "The value of <addr> must be 32-bit aligned and from 0x{:08x} to 0x{:08x}",
        OPTION_BASE,
        OPTION_BASE + info.option_size - 4
    );
}

fn cmd_option(driver: &mut Stm32lx, target: &mut dyn Target, out: &mut dyn Console, argv: &[&str]) -> bool {
    let Some(action) = parse_option_args(driver, argv) else {
        option_usage(driver, out);
        return true;
    };
    let controller = driver.family().info().controller;

    match action {
        OptionAction::Show => {}
        OptionAction::Launch => {
            writeln!(out, "Launching option byte load");
            if let Err(e) = obl_launch(target, controller) {
                writeln!(out, "option byte load failed: {}", e);
                return false;
            }
        }
        OptionAction::Write { addr, value, raw } => {
            writeln!(
                out,
                "{} 0x{:08x} <- 0x{:08x}",
                if raw { "raw" } else { "write" },
                addr,
                value
            );
            if raw && !OptionWord(value).is_valid() {
                log::warn!("Option word 0x{:08x} is not complemented, it will not load", value);
            }
            match option_write(target, controller, addr, value) {
                Ok(()) => {}
                Err(Error::UnlockFailed) => {
                    writeln!(out, "unable to unlock FLASH option bytes");
                    return false;
                }
                Err(e) => {
                    writeln!(out, "option write failed: {}", e);
                    return false;
                }
            }
        }
    }

    if let Err(e) = report(target, driver.family(), out) {
        writeln!(out, "failed to read option bytes: {}", e);
        return false;
    }
    true
}

fn eeprom_usage(driver: &Stm32lx, out: &mut dyn Console) {
    let info = driver.family().info();
    writeln!(out, "usage: monitor eeprom [ARGS]");
    writeln!(out, "  byte     <addr> <value8>  - Write a byte");
    writeln!(out, "  halfword <addr> <value16> - Write a half-word");
    writeln!(out, "  word     <addr> <value32> - Write a word");
    writeln!(
        out,
        "The value of <addr> must be in the interval [0x{:08x}, 0x{:08x})",
        EEPROM_BASE,
        EEPROM_BASE + info.eeprom_size
    );
}

fn parse_width(keyword: &str) -> Option<DataWidth> {
    [DataWidth::Byte, DataWidth::HalfWord, DataWidth::Word]
        .into_iter()
        .find(|width| matches_keyword(keyword, width.keyword()))
}

fn cmd_eeprom(driver: &mut Stm32lx, target: &mut dyn Target, out: &mut dyn Console, argv: &[&str]) -> bool {
    let info = driver.family().info();
    let parsed = match argv {
        [_, width, addr, value] => parse_width(width)
            .zip(parse_number(addr))
            .zip(parse_number(value))
            .map(|((width, addr), value)| (width, addr, value)),
        _ => None,
    };
    let Some((width, addr, value)) = parsed else {
        eeprom_usage(driver, out);
        return true;
    };

    if addr < EEPROM_BASE || addr - EEPROM_BASE + width.bytes() > info.eeprom_size {
        eeprom_usage(driver, out);
        return true;
    }
    if addr % width.bytes() != 0 {
        writeln!(out, "Refusing to do unaligned write");
        eeprom_usage(driver, out);
        return true;
    }

    let value = match width {
        DataWidth::Byte => value & 0xff,
        DataWidth::HalfWord => value & 0xffff,
        DataWidth::Word => value,
    };
    writeln!(out, "writing {} 0x{:08x} with 0x{:x}", width.keyword(), addr, value);
    match eeprom_write_one(target, info, addr, width, value) {
        Ok(()) => true,
        Err(Error::UnlockFailed) => {
            writeln!(out, "unable to unlock EEPROM");
            false
        }
        Err(e) => {
            writeln!(out, "eeprom write failed: {}", e);
            false
        }
    }
}
