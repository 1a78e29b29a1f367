//! Persisted orchestrator status.
//!
//! The status file is a flat `key=value` record:
//!
//! ```text
//! is_second_boot=0
//! current_rom=Internal
//! auto_boot_seconds=5
//! auto_boot_rom=
//! ```
//!
//! It is read once at the start of a run and written back before exit.

use anyhow::{Context, Result};
use std::fs;
use std::sync::Arc;

use crate::config::Config;
use crate::partition::PartitionTable;
use crate::process::ProcessRunner;
use crate::registry::RomRegistry;
use crate::rom::{Rom, INTERNAL_ROM_NAME};

/// Values as stored on disk, before resolution against the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusRecord {
    pub is_second_boot: bool,
    pub current_rom: String,
    pub auto_boot_seconds: i32,
    pub auto_boot_rom: String,
}

impl StatusRecord {
    /// Parse the key=value format. Unknown keys and malformed lines are ignored.
    pub fn parse(content: &str) -> Self {
        let mut record = Self::default();
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "is_second_boot" => record.is_second_boot = parse_int(value) != 0,
                "current_rom" => record.current_rom = value.to_string(),
                "auto_boot_seconds" => record.auto_boot_seconds = parse_int(value),
                "auto_boot_rom" => record.auto_boot_rom = value.to_string(),
                other => tracing::debug!("ignoring status key '{}'", other),
            }
        }
        record
    }

    pub fn render(&self) -> String {
        format!(
            "is_second_boot={}\ncurrent_rom={}\nauto_boot_seconds={}\nauto_boot_rom={}\n",
            u8::from(self.is_second_boot),
            self.current_rom,
            self.auto_boot_seconds,
            self.auto_boot_rom
        )
    }
}

/// Integer prefix parse; garbage reads as 0.
fn parse_int(value: &str) -> i32 {
    let end = value
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    value[..end].parse().unwrap_or(0)
}

/// Live status for one orchestration run.
pub struct Status {
    pub is_second_boot: bool,
    pub current_rom: Option<String>,
    pub auto_boot_rom: Option<String>,
    pub auto_boot_seconds: i32,
    pub registry: RomRegistry,
    pub partitions: Arc<PartitionTable>,
}

impl Status {
    /// Scan local ROMs and overlay the persisted record.
    ///
    /// A missing or unreadable status file falls back to defaults. Failing to
    /// initialize the registry is fatal.
    pub fn load(cfg: &Config, runner: &dyn ProcessRunner) -> Result<Self> {
        let mut registry = RomRegistry::new();
        registry
            .scan_local(cfg, runner)
            .context("Failed to initialize ROM registry")?;

        let path = cfg.status_file();
        let record = match fs::read_to_string(&path) {
            Ok(content) => StatusRecord::parse(&content),
            Err(e) => {
                tracing::warn!(
                    "Failed to read status file {} ({}), using defaults",
                    path.display(),
                    e
                );
                StatusRecord::default()
            }
        };

        let status = Self::from_record(record, registry);
        status.dump();
        Ok(status)
    }

    /// Resolve a stored record against a scanned registry.
    pub fn from_record(record: StatusRecord, registry: RomRegistry) -> Self {
        let current_rom = if registry.get(&record.current_rom).is_some() {
            Some(record.current_rom)
        } else {
            if !record.current_rom.is_empty() {
                tracing::warn!(
                    "Failed to select current ROM ({}), using {}",
                    record.current_rom,
                    INTERNAL_ROM_NAME
                );
            }
            registry
                .get(INTERNAL_ROM_NAME)
                .map(|r| r.name.clone())
        };

        let auto_boot_rom = if record.auto_boot_rom.is_empty() {
            None
        } else if registry.get(&record.auto_boot_rom).is_some() {
            Some(record.auto_boot_rom)
        } else {
            tracing::warn!(
                "Could not find ROM {} to auto-boot, using {}",
                record.auto_boot_rom,
                INTERNAL_ROM_NAME
            );
            registry
                .get(INTERNAL_ROM_NAME)
                .map(|r| r.name.clone())
        };

        Self {
            is_second_boot: record.is_second_boot,
            current_rom,
            auto_boot_rom,
            auto_boot_seconds: record.auto_boot_seconds,
            registry,
            partitions: Arc::new(PartitionTable::new()),
        }
    }

    pub fn to_record(&self) -> StatusRecord {
        StatusRecord {
            is_second_boot: self.is_second_boot,
            current_rom: self
                .current_rom
                .clone()
                .unwrap_or_else(|| INTERNAL_ROM_NAME.to_string()),
            auto_boot_seconds: self.auto_boot_seconds,
            auto_boot_rom: self.auto_boot_rom.clone().unwrap_or_default(),
        }
    }

    pub fn save(&self, cfg: &Config) -> Result<()> {
        let path = cfg.status_file();
        fs::write(&path, self.to_record().render())
            .with_context(|| format!("Failed to write status file {}", path.display()))?;
        tracing::debug!("saved status to {}", path.display());
        Ok(())
    }

    pub fn current(&self) -> Option<&Rom> {
        self.current_rom
            .as_deref()
            .and_then(|name| self.registry.get(name))
    }

    pub fn auto_boot(&self) -> Option<&Rom> {
        self.auto_boot_rom
            .as_deref()
            .and_then(|name| self.registry.get(name))
    }

    /// Re-read removable ROMs from the current partition table.
    pub fn rescan_usb(&mut self) {
        self.registry.scan_partitions(&self.partitions);
    }

    /// Log the status at debug level.
    pub fn dump(&self) {
        tracing::debug!("status: is_second_boot={}", self.is_second_boot);
        tracing::debug!(
            "status: current_rom={}",
            self.current_rom.as_deref().unwrap_or("NULL")
        );
        tracing::debug!("status: auto_boot_seconds={}", self.auto_boot_seconds);
        tracing::debug!(
            "status: auto_boot_rom={}",
            self.auto_boot_rom.as_deref().unwrap_or("NULL")
        );
        self.registry.dump();
    }
}
