//! Erase command implementations

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use swdflash_session::Session;

fn spinner(message: String) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// Erase `[start, start + length)`
pub fn run_erase(
    session: &mut Session,
    start: u32,
    length: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let pb = spinner(format!("Erasing 0x{:08x}+0x{:x}...", start, length))?;
    let result = session.erase(start, length);
    match &result {
        Ok(()) => pb.finish_with_message("Erase complete"),
        Err(_) => pb.finish_with_message("Erase failed"),
    }
    Ok(result?)
}

/// Erase every region
pub fn run_mass_erase(session: &mut Session) -> Result<(), Box<dyn std::error::Error>> {
    let pb = spinner(format!("Mass erasing {}...", session.variant()))?;
    let result = session.mass_erase();
    match &result {
        Ok(()) => pb.finish_with_message("Mass erase complete"),
        Err(_) => pb.finish_with_message("Mass erase failed"),
    }
    Ok(result?)
}
