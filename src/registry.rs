//! ROM discovery and the in-memory catalog.
//!
//! Two independent discovery passes feed the registry: the local `roms/`
//! folder and the `multirom/` folder of every mounted removable partition.
//! Each pass only ever replaces its own entries.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::common;
use crate::config::Config;
use crate::partition::{Partition, PartitionTable};
use crate::process::ProcessRunner;
use crate::rom::{Rom, RomId, BOOT_IMAGE, INTERNAL_ROM_NAME, IN_ROOT_MARKER, MAX_ROM_NAME_LEN};

/// Folder on a removable partition holding its ROMs.
pub const USB_ROMS_DIR: &str = "multirom";

/// The catalog of known ROMs, kept sorted by name.
#[derive(Debug, Default, Clone)]
pub struct RomRegistry {
    roms: Vec<Rom>,
}

impl RomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover local ROMs, synthesizing `Internal` when it is missing.
    ///
    /// Removable-media entries are left untouched. Failing to produce an
    /// `Internal` ROM is fatal.
    pub fn scan_local(&mut self, cfg: &Config, runner: &dyn ProcessRunner) -> Result<()> {
        let roms_dir = cfg.roms_dir();
        let mut found = match scan_dir(&roms_dir, None) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Failed to open roms dir {}: {:#}", roms_dir.display(), e);
                Vec::new()
            }
        };

        if !found.iter().any(|r| r.name == INTERNAL_ROM_NAME) {
            tracing::warn!("no Internal ROM folder, importing the running system");
            import_internal(cfg, runner).context("Failed to create the Internal ROM")?;
            found = scan_dir(&roms_dir, None)?;
        }

        self.roms.retain(Rom::is_removable);
        self.merge(found);

        if self.get(INTERNAL_ROM_NAME).is_none() {
            bail!("No Internal ROM found after scanning {}", roms_dir.display());
        }
        Ok(())
    }

    /// Discover local ROMs without creating anything on disk.
    ///
    /// A missing `Internal` folder is only logged. Used by read-only callers.
    pub fn scan_local_existing(&mut self, cfg: &Config) -> Result<()> {
        let roms_dir = cfg.roms_dir();
        let found = scan_dir(&roms_dir, None)
            .with_context(|| format!("Failed to open roms dir {}", roms_dir.display()))?;
        if !found.iter().any(|r| r.name == INTERNAL_ROM_NAME) {
            tracing::warn!("no Internal ROM folder in {}", roms_dir.display());
        }

        self.roms.retain(Rom::is_removable);
        self.merge(found);
        Ok(())
    }

    /// Discover ROMs on every mounted removable partition.
    ///
    /// The partition table stays locked for the whole scan so the monitor
    /// cannot swap partitions out underneath it. Previous removable entries,
    /// including ones on vanished partitions, are dropped first.
    pub fn scan_partitions(&mut self, table: &PartitionTable) {
        self.roms.retain(|r| !r.is_removable());

        let parts = table.lock();
        let mut found = Vec::new();
        for part in parts.iter() {
            let dir = part.mount_path.join(USB_ROMS_DIR);
            if !dir.is_dir() {
                continue;
            }
            match scan_dir(&dir, Some(part)) {
                Ok(roms) => found.extend(roms),
                Err(e) => tracing::warn!("skipping partition {}: {:#}", part.name, e),
            }
        }
        drop(parts);

        self.merge(found);
    }

    /// Sort a discovered batch and merge it, skipping names already taken.
    fn merge(&mut self, mut found: Vec<Rom>) {
        sort_by_name(&mut found);
        for rom in found {
            if self.get(&rom.name).is_some() {
                tracing::warn!(
                    "skipping ROM {} at {}: name already in use",
                    rom.name,
                    rom.base_path.display()
                );
                continue;
            }
            self.roms.push(rom);
        }
        sort_by_name(&mut self.roms);
    }

    pub fn roms(&self) -> &[Rom] {
        &self.roms
    }

    pub fn len(&self) -> usize {
        self.roms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roms.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Rom> {
        self.roms.iter().find(|r| r.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Rom> {
        self.roms.iter_mut().find(|r| r.name == name)
    }

    pub fn get_by_id(&self, id: RomId) -> Option<&Rom> {
        self.roms.iter().find(|r| r.id == id)
    }

    /// The ROM currently occupying the real root, if any.
    pub fn in_root(&self) -> Option<&Rom> {
        self.roms.iter().find(|r| r.is_in_root)
    }

    /// Move the in-root flag to `name`, clearing it everywhere else.
    pub fn set_in_root(&mut self, name: &str) {
        for rom in &mut self.roms {
            rom.is_in_root = rom.name == name;
        }
    }

    /// Log the catalog at debug level.
    pub fn dump(&self) {
        for rom in &self.roms {
            tracing::debug!(
                "ROM {}: type={} path={} in_root={} boot_img={}",
                rom.name,
                rom.rom_type,
                rom.base_path.display(),
                rom.is_in_root,
                rom.has_boot_image
            );
        }
    }
}

/// ROM names compare bytewise, which is C-locale collation.
fn sort_by_name(roms: &mut [Rom]) {
    roms.sort_by(|a, b| a.name.cmp(&b.name));
}

/// Enumerate ROM folders in `dir`.
fn scan_dir(dir: &Path, partition: Option<&Arc<Partition>>) -> Result<Vec<Rom>> {
    let mut roms = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            tracing::warn!("skipping ROM with non UTF-8 name in {}", dir.display());
            continue;
        };

        if name.starts_with('.') {
            continue;
        }
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if name.len() > MAX_ROM_NAME_LEN {
            tracing::warn!(
                "skipping ROM {}, name is too long (max {} chars allowed)",
                name,
                MAX_ROM_NAME_LEN
            );
            continue;
        }

        let rom = Rom::probe(name, &entry.path(), partition);
        tracing::debug!("adding ROM {} ({})", rom.name, rom.rom_type);
        roms.push(rom);
    }
    Ok(roms)
}

/// Create the `Internal` ROM from the running system.
///
/// Dumps the active boot partition into `Internal/boot.img` and marks the ROM
/// as the one in root, since the running system is what occupies it.
pub fn import_internal(cfg: &Config, runner: &dyn ProcessRunner) -> Result<()> {
    let rom_dir = cfg.roms_dir().join(INTERNAL_ROM_NAME);
    fs::create_dir_all(&rom_dir)
        .with_context(|| format!("Failed to create {}", rom_dir.display()))?;

    let boot_img = rom_dir.join(BOOT_IMAGE);
    dump_boot(cfg, runner, &boot_img)?;

    common::touch(&rom_dir.join(IN_ROOT_MARKER))?;
    Ok(())
}

/// Copy the active boot partition to `dest` with busybox `dd`.
pub fn dump_boot(cfg: &Config, runner: &dyn ProcessRunner, dest: &Path) -> Result<()> {
    tracing::info!("dumping boot image to {}", dest.display());
    let args = vec![
        "dd".to_string(),
        format!("if={}", cfg.boot_block.display()),
        format!("of={}", dest.display()),
    ];
    let code = runner.run_status(&cfg.busybox(), &args)?;
    if code != 0 {
        bail!(
            "dd of {} failed (exit code {})",
            cfg.boot_block.display(),
            code
        );
    }
    Ok(())
}
