//! Probe and info command implementations

use swdflash_session::{RegionKind, Session};

fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

/// Print the identified device
pub fn run_probe(session: &Session) {
    println!("Found device: {}", session.variant());
}

/// Print regions and monitor commands
pub fn run_info(session: &Session) {
    println!("Device Information");
    println!("==================");
    println!();
    println!("Variant:         {}", session.variant());
    println!();
    println!("NVM regions:");
    for region in session.regions() {
        let kind = match region.kind {
            RegionKind::Flash => "flash",
            RegionKind::DataFlash => "data flash",
        };
        println!(
            "  {:<10} 0x{:08X} - 0x{:08X} ({}, {} B blocks, {} B writes, erased 0x{:02X})",
            kind,
            region.start,
            region.end() - 1,
            format_size(region.length),
            region.block_size,
            region.write_size,
            region.erased
        );
    }
    println!();
    println!("Monitor commands:");
    for command in session.commands() {
        println!("  {:<14} {}", command.name, command.help);
    }
}
