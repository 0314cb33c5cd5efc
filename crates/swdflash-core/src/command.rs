//! Monitor command tables
//!
//! Each driver family exposes a static, immutable table of line commands.
//! A command receives the already tokenised argument vector (`argv[0]` is
//! the command name) and writes human readable output to a [`Console`].
//!
//! Handlers return `true` when the command was handled, which includes
//! printing a usage text for bad arguments. `false` is reserved for a
//! failed hardware operation.

use core::fmt;

use crate::target::Target;

/// Line-oriented output of the current session
///
/// The method is named `write_fmt` so the standard `write!`/`writeln!`
/// macros work on any `&mut dyn Console`.
pub trait Console {
    /// Write formatted text to the console
    fn write_fmt(&mut self, args: fmt::Arguments<'_>);
}

#[cfg(feature = "alloc")]
impl Console for alloc::string::String {
    fn write_fmt(&mut self, args: fmt::Arguments<'_>) {
        let _ = fmt::Write::write_fmt(self, args);
    }
}

/// Command handler signature
pub type Handler<D> = fn(&mut D, &mut dyn Target, &mut dyn Console, &[&str]) -> bool;

/// One entry of a driver's monitor command table
pub struct Command<D: 'static> {
    /// Command name as typed by the user
    pub name: &'static str,
    /// Handler invoked with the full argument vector
    pub handler: Handler<D>,
    /// One line help text
    pub help: &'static str,
}

/// Name and help text of a command, without its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandInfo {
    /// Command name
    pub name: &'static str,
    /// One line help text
    pub help: &'static str,
}

impl<D: 'static> Command<D> {
    /// Strip the handler
    pub fn info(&self) -> CommandInfo {
        CommandInfo {
            name: self.name,
            help: self.help,
        }
    }
}

/// Run the command named by `argv[0]`, see [`find`]
///
/// Returns `None` when nothing matched so the caller can try other tables.
pub fn dispatch<D: 'static>(
    commands: &[Command<D>],
    driver: &mut D,
    target: &mut dyn Target,
    console: &mut dyn Console,
    argv: &[&str],
) -> Option<bool> {
    let command = find(commands, argv.first()?)?;
    log::debug!("monitor: {} ({} args)", command.name, argv.len() - 1);
    Some((command.handler)(driver, target, console, argv))
}

/// Look up `name` in a command table, exact names before abbreviations
pub fn find<'a, D: 'static>(commands: &'a [Command<D>], name: &str) -> Option<&'a Command<D>> {
    if name.is_empty() {
        return None;
    }
    commands
        .iter()
        .find(|c| c.name == name)
        .or_else(|| commands.iter().find(|c| c.name.starts_with(name)))
}

/// Case-insensitive abbreviation match
///
/// `input` matches when it is a non-empty prefix of `keyword`, so `obl`
/// selects `obl_launch` and `h` selects `halfword`.
pub fn matches_keyword(input: &str, keyword: &str) -> bool {
    !input.is_empty()
        && input.len() <= keyword.len()
        && keyword.as_bytes()[..input.len()].eq_ignore_ascii_case(input.as_bytes())
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}
