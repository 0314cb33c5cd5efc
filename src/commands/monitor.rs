//! Monitor command passthrough

use swdflash_session::Session;

/// Run one monitor command line and print what it reported
pub fn run_monitor(session: &mut Session, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let line = if args.is_empty() {
        "help".to_string()
    } else {
        args.join(" ")
    };

    let mut out = String::new();
    let result = session.monitor(&line, &mut out);
    print!("{}", out);

    if !result? {
        return Err(format!("Monitor command '{}' failed", line).into());
    }
    Ok(())
}
