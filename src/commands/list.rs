//! List command - prints the ROM catalog.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::mount::SysMounter;
use crate::partition::{PartitionScanner, PartitionTable};
use crate::process::SystemRunner;
use crate::registry::RomRegistry;
use crate::rom::RomSummary;

/// Execute the list command.
pub fn cmd_list(config: &Config, usb: bool, json: bool) -> Result<()> {
    let runner = Arc::new(SystemRunner);
    let mounter = Arc::new(SysMounter::default());

    let mut registry = RomRegistry::new();
    registry.scan_local_existing(config)?;

    let table = PartitionTable::new();
    if usb {
        let scanner = PartitionScanner::new(config.clone(), runner, mounter.clone());
        let count = scanner.rescan(&table)?;
        tracing::info!("{} removable partition(s) mounted", count);
        registry.scan_partitions(&table);
    }

    let summaries: Vec<RomSummary> = registry.roms().iter().map(|r| r.summary()).collect();
    if json {
        let out = serde_json::to_string_pretty(&summaries).context("Failed to encode ROM list")?;
        println!("{}", out);
    } else {
        print_table(&summaries);
    }

    table.release_all(mounter.as_ref());
    Ok(())
}

fn print_table(roms: &[RomSummary]) {
    println!("{:<26}  {:<16}  {:<7}  {:<8}  PATH", "NAME", "TYPE", "IN ROOT", "BOOT.IMG");
    for rom in roms {
        println!(
            "{:<26}  {:<16}  {:<7}  {:<8}  {}",
            rom.name,
            rom.rom_type.to_string(),
            if rom.is_in_root { "yes" } else { "" },
            if rom.has_boot_image { "yes" } else { "" },
            rom.base_path
        );
    }
    println!("\n{} ROM(s)", roms.len());
}
