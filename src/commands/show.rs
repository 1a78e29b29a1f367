//! Show command - displays information.

use anyhow::Result;

use crate::config::Config;
use crate::process::SystemRunner;
use crate::status::Status;

/// Show target for the show command.
pub enum ShowTarget {
    /// Resolved configuration
    Config,
    /// Persisted status resolved against the local ROMs
    Status,
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Status => {
            let status = Status::load(config, &SystemRunner)?;
            let record = status.to_record();
            println!("Status ({}):", config.status_file().display());
            println!("  is_second_boot:    {}", u8::from(record.is_second_boot));
            println!("  current_rom:       {}", record.current_rom);
            println!("  auto_boot_seconds: {}", record.auto_boot_seconds);
            println!(
                "  auto_boot_rom:     {}",
                status.auto_boot_rom.as_deref().unwrap_or("(none)")
            );
            match status.registry.in_root() {
                Some(rom) => println!("  in root:           {}", rom.name),
                None => println!("  in root:           (none)"),
            }
            println!("  ROMs:              {}", status.registry.len());
        }
    }
    Ok(())
}
