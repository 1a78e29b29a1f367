//! Removable-media partitions.
//!
//! The [`PartitionTable`] is the shared list of mounted removable partitions.
//! [`PartitionScanner`] rebuilds it from blkid output; [`monitor`] runs the
//! scanner in the background whenever the block-device directory changes.
//!
//! Only the scanner side creates, replaces or destroys partitions. ROMs keep
//! `Weak` references, so a ROM on a vanished partition is detectable without
//! keeping the partition alive.

pub mod blkid;
pub mod monitor;

use anyhow::{bail, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::Config;
use crate::mount::Mounter;
use crate::process::ProcessRunner;

pub use blkid::BlkidRecord;
pub use monitor::PartitionMonitor;

/// A mounted removable partition.
#[derive(Debug)]
pub struct Partition {
    /// Device name, e.g. `sda1`.
    pub name: String,
    pub uuid: Option<String>,
    pub fs_type: String,
    pub mount_path: PathBuf,
    keep_mounted: AtomicBool,
}

impl Partition {
    pub fn new(name: &str, uuid: Option<String>, fs_type: &str, mount_path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            uuid,
            fs_type: fs_type.to_string(),
            mount_path,
            keep_mounted: AtomicBool::new(false),
        }
    }

    pub fn keep_mounted(&self) -> bool {
        self.keep_mounted.load(Ordering::SeqCst)
    }

    /// Mark the partition as backing the ROM being booted; teardown leaves it mounted.
    pub fn set_keep_mounted(&self) {
        self.keep_mounted.store(true, Ordering::SeqCst);
    }

    /// Unmount unless `keep_mounted` is set. Failures are logged, not returned.
    pub fn release(&self, mounter: &dyn Mounter) {
        if self.keep_mounted() {
            tracing::info!("keeping {} mounted at {}", self.name, self.mount_path.display());
            return;
        }
        if let Err(e) = mounter.unmount(&self.mount_path) {
            tracing::warn!("failed to unmount partition {}: {:#}", self.name, e);
        }
    }
}

/// The shared partition list. All access goes through one mutex.
#[derive(Debug, Default)]
pub struct PartitionTable {
    parts: Mutex<Vec<Arc<Partition>>>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the list. Hold the guard for the whole read when scanning ROMs.
    pub fn lock(&self) -> MutexGuard<'_, Vec<Arc<Partition>>> {
        self.parts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Swap in a new list and return the previous one.
    pub fn replace(&self, parts: Vec<Arc<Partition>>) -> Vec<Arc<Partition>> {
        std::mem::replace(&mut *self.lock(), parts)
    }

    pub fn snapshot(&self) -> Vec<Arc<Partition>> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Destroy every partition, honoring `keep_mounted`.
    pub fn release_all(&self, mounter: &dyn Mounter) {
        for part in self.replace(Vec::new()) {
            part.release(mounter);
        }
    }
}

/// Rebuilds a [`PartitionTable`] from blkid output.
#[derive(Clone)]
pub struct PartitionScanner {
    cfg: Config,
    runner: Arc<dyn ProcessRunner>,
    mounter: Arc<dyn Mounter>,
}

impl PartitionScanner {
    pub fn new(cfg: Config, runner: Arc<dyn ProcessRunner>, mounter: Arc<dyn Mounter>) -> Self {
        Self {
            cfg,
            runner,
            mounter,
        }
    }

    /// Re-detect removable partitions and mount them.
    ///
    /// The table lock is only held while list contents are swapped. A
    /// partition that fails to mount is dropped; the others still make it in.
    /// Returns the number of mounted partitions.
    pub fn rescan(&self, table: &PartitionTable) -> Result<usize> {
        let output = self
            .runner
            .run_stdout(&self.cfg.busybox(), &["blkid".to_string()])?;
        let records: Vec<BlkidRecord> = blkid::parse_output(&output)
            .into_iter()
            .filter(BlkidRecord::is_removable)
            .collect();

        for old in table.replace(Vec::new()) {
            old.release(self.mounter.as_ref());
        }

        let mut fresh = Vec::with_capacity(records.len());
        for record in &records {
            match self.mount_record(record) {
                Ok(part) => {
                    tracing::info!(
                        "found partition {}: uuid={} fs={}",
                        part.name,
                        part.uuid.as_deref().unwrap_or("-"),
                        part.fs_type
                    );
                    fresh.push(Arc::new(part));
                }
                Err(e) => tracing::warn!("dropping partition {}: {:#}", record.name, e),
            }
        }

        let count = fresh.len();
        table.replace(fresh);
        Ok(count)
    }

    fn mount_record(&self, record: &BlkidRecord) -> Result<Partition> {
        let Some(fs_type) = record.fs_type.as_deref() else {
            bail!("no filesystem type reported");
        };

        let mount_path = self.cfg.mnt_dir.join(&record.name);
        fs::create_dir_all(&mount_path)?;

        let device = self.cfg.dev_block.join(&record.name);
        self.mounter.mount(&device, &mount_path, fs_type, false)?;

        Ok(Partition::new(
            &record.name,
            record.uuid.clone(),
            fs_type,
            mount_path,
        ))
    }
}
