//! Configuration management for romswitch.
//!
//! Every path the orchestrator touches is resolved once at startup into a
//! [`Config`] and handed to the components that need it. Values come from
//! environment variables (a `.env` file is merged by `main` via dotenvy);
//! anything unset falls back to the on-device defaults.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Mount point of the real data partition.
pub const DEFAULT_REALDATA: &str = "/realdata";
/// Boot partition dumped when the Internal ROM has to be synthesized.
pub const DEFAULT_BOOT_BLOCK: &str = "/dev/block/mmcblk0p2";
/// Lowest physical address kexec may place the new kernel at.
pub const KEXEC_MEM_MIN: &str = "0xA0000000";
/// Appended to the running kernel's command line when booting Ubuntu.
pub const UBUNTU_CMDLINE: &str = "root=/dev/mmcblk0p9 ro console=tty1 fbcon=rotate:1 quiet";

const DEFAULT_POLL_MS: u64 = 2500;

/// Resolved paths and tunables for one orchestration run.
#[derive(Debug, Clone)]
pub struct Config {
    /// MultiROM base directory (holds `roms/`, tools and the status file).
    pub base_dir: PathBuf,
    /// Live root of the real data partition, the one ROMs are swapped into.
    pub realdata: PathBuf,
    /// Ramdisk root: patched init scripts, `/system`, `/data`, `/zImage`.
    pub root: PathBuf,
    /// Active boot partition.
    pub boot_block: PathBuf,
    /// Directory whose change time signals block devices coming and going.
    pub dev_block: PathBuf,
    /// Where removable partitions get mounted.
    pub mnt_dir: PathBuf,
    /// procfs mount point.
    pub proc_dir: PathBuf,
    /// Partition monitor poll interval.
    pub poll_interval: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(|key| vars.get(key).cloned())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path_or = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .map(|v| PathBuf::from(v.trim()))
                .unwrap_or_else(|| PathBuf::from(default))
        };

        let realdata = path_or("ROMSWITCH_REALDATA", DEFAULT_REALDATA);
        let base_dir = match lookup("ROMSWITCH_BASE_DIR").filter(|v| !v.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir.trim()),
            None => find_base_dir(&realdata)?,
        };

        let poll_ms = match lookup("ROMSWITCH_POLL_MS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => {
                    tracing::warn!("ignoring invalid ROMSWITCH_POLL_MS '{}'", raw);
                    DEFAULT_POLL_MS
                }
            },
            None => DEFAULT_POLL_MS,
        };

        Ok(Self {
            base_dir,
            realdata,
            root: path_or("ROMSWITCH_ROOT", "/"),
            boot_block: path_or("ROMSWITCH_BOOT_BLOCK", DEFAULT_BOOT_BLOCK),
            dev_block: path_or("ROMSWITCH_DEV_BLOCK", "/dev/block"),
            mnt_dir: path_or("ROMSWITCH_MNT", "/mnt"),
            proc_dir: path_or("ROMSWITCH_PROC", "/proc"),
            poll_interval: Duration::from_millis(poll_ms),
        })
    }

    /// Lay out every path under `dir`, mirroring the on-device tree.
    pub fn for_testing(dir: &Path) -> Self {
        let realdata = dir.join("realdata");
        Self {
            base_dir: realdata.join("media/0/multirom"),
            realdata,
            root: dir.join("root"),
            boot_block: dir.join("dev/block/mmcblk0p2"),
            dev_block: dir.join("dev/block"),
            mnt_dir: dir.join("mnt"),
            proc_dir: dir.join("proc"),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn roms_dir(&self) -> PathBuf {
        self.base_dir.join("roms")
    }

    pub fn status_file(&self) -> PathBuf {
        self.base_dir.join("multirom.ini")
    }

    pub fn busybox(&self) -> PathBuf {
        self.base_dir.join("busybox")
    }

    pub fn kexec(&self) -> PathBuf {
        self.base_dir.join("kexec")
    }

    /// Copy of the kexec binary kept in the ramdisk for the final exec step.
    pub fn kexec_cache(&self) -> PathBuf {
        self.root.join("kexec")
    }

    pub fn proc_cmdline(&self) -> PathBuf {
        self.proc_dir.join("cmdline")
    }

    pub fn proc_config_gz(&self) -> PathBuf {
        self.proc_dir.join("config.gz")
    }

    /// A path inside the ramdisk root, e.g. `in_root("system")`.
    pub fn in_root(&self, rel: &str) -> PathBuf {
        self.root.join(rel.trim_start_matches('/'))
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  BASE_DIR:   {}", self.base_dir.display());
        println!("  REALDATA:   {}", self.realdata.display());
        println!("  ROOT:       {}", self.root.display());
        println!("  BOOT_BLOCK: {}", self.boot_block.display());
        println!("  DEV_BLOCK:  {}", self.dev_block.display());
        println!("  MNT:        {}", self.mnt_dir.display());
        println!("  PROC:       {}", self.proc_dir.display());
        println!("  POLL:       {} ms", self.poll_interval.as_millis());
        for (name, path) in [("busybox", self.busybox()), ("kexec", self.kexec())] {
            let state = if path.exists() { "FOUND" } else { "NOT FOUND" };
            println!("  {}: {} ({})", name, path.display(), state);
        }
    }
}

/// Locate the MultiROM directory on the data partition.
///
/// Android 4.2 moved the emulated sdcard to `media/0`; both layouts are tried.
pub fn find_base_dir(realdata: &Path) -> Result<PathBuf> {
    let candidates = [
        realdata.join("media/0/multirom"),
        realdata.join("media/multirom"),
    ];
    for candidate in &candidates {
        if candidate.is_dir() {
            return Ok(candidate.clone());
        }
    }
    bail!(
        "Could not find multirom dir (looked in {} and {})",
        candidates[0].display(),
        candidates[1].display()
    )
}
