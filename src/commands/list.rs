//! List command implementation

/// List supported probes and driver families
pub fn list_drivers() {
    println!("Supported probes:");
    println!();
    for probe in swdflash_session::available_probes() {
        let aliases = if probe.aliases.is_empty() {
            String::new()
        } else {
            format!(" (aliases: {})", probe.aliases.join(", "))
        };
        println!("  {:<10} - {}{}", probe.name, probe.description, aliases);
    }

    println!();
    println!("Driver families (in probe order):");
    println!();
    for driver in swdflash_session::available_drivers() {
        println!("  {:<10} - {}", driver.name, driver.parts);
        println!("  {:<10}   {}", "", driver.description);
    }
}
