//! Root swap: relocating the real root's contents in and out of ROM folders.
//!
//! Exactly one ROM occupies the real root (the data partition mounted at
//! `realdata`). Switching to another root-based ROM moves every top-level
//! entry of the real root into the current ROM's `root/` folder, then moves
//! the target's `root/` entries onto the real root. `media` never moves: it
//! is the shared storage that also holds the ROM folders themselves.
//!
//! Moves are not transactional. The first failing move aborts and nothing is
//! rolled back; [`SwapError`] tells the caller whether anything had moved.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::common;
use crate::config::Config;
use crate::process::ProcessRunner;
use crate::registry::RomRegistry;
use crate::rom::Rom;

/// Entry of the real root that is never relocated.
pub const PRESERVED_ENTRY: &str = "media";

#[derive(Debug, Error)]
pub enum SwapError {
    /// Refused or failed before the first move; the filesystem is untouched.
    #[error("root swap aborted before any move: {reason}")]
    Clean { reason: String },

    /// At least one entry already moved; the real root is in an unknown state.
    #[error("root swap aborted after {moved} move(s), failed on {}: {reason}", .failed.display())]
    Indeterminate {
        moved: usize,
        failed: PathBuf,
        reason: String,
    },
}

impl SwapError {
    fn clean(reason: impl Into<String>) -> Self {
        SwapError::Clean {
            reason: reason.into(),
        }
    }

    /// True when nothing on disk changed.
    pub fn is_clean(&self) -> bool {
        matches!(self, SwapError::Clean { .. })
    }
}

/// Where one half of a swap stopped.
struct MoveFailure {
    moved: usize,
    failed: PathBuf,
    reason: String,
}

impl MoveFailure {
    fn new(moved: usize, failed: &Path, reason: impl Into<String>) -> Self {
        Self {
            moved,
            failed: failed.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Clean only if neither this half nor anything before it changed the disk.
    fn classify(self, prior_moves: usize, touched: bool) -> SwapError {
        let moved = prior_moves + self.moved;
        if moved == 0 && !touched {
            SwapError::clean(format!("{}: {}", self.failed.display(), self.reason))
        } else {
            SwapError::Indeterminate {
                moved,
                failed: self.failed,
                reason: self.reason,
            }
        }
    }
}

/// Moves directory entries with the external `mv` applet.
pub struct RootSwapper<'a> {
    cfg: &'a Config,
    runner: &'a dyn ProcessRunner,
}

impl<'a> RootSwapper<'a> {
    pub fn new(cfg: &'a Config, runner: &'a dyn ProcessRunner) -> Self {
        Self { cfg, runner }
    }

    /// Move the real root's contents into `<rom>/root/` and clear the marker.
    ///
    /// Returns the number of entries moved.
    pub fn move_out_of_root(&self, rom: &Rom) -> Result<usize, SwapError> {
        self.out_of_root(rom).map_err(|f| f.classify(0, false))
    }

    /// Move `<rom>/root/` contents onto the real root and create the marker.
    pub fn move_to_root(&self, rom: &Rom) -> Result<usize, SwapError> {
        self.to_root(rom).map_err(|f| f.classify(0, false))
    }

    fn out_of_root(&self, rom: &Rom) -> Result<usize, MoveFailure> {
        tracing::info!("moving ROM {} out of root", rom.name);
        let dest = rom.root_folder();
        fs::create_dir_all(&dest).map_err(|e| MoveFailure::new(0, &dest, e.to_string()))?;

        let moved = self.move_entries(&self.cfg.realdata, &dest)?;

        let marker = rom.in_root_marker();
        common::remove_if_exists(&marker)
            .map_err(|e| MoveFailure::new(moved, &marker, format!("{:#}", e)))?;
        Ok(moved)
    }

    fn to_root(&self, rom: &Rom) -> Result<usize, MoveFailure> {
        tracing::info!("moving ROM {} to root", rom.name);
        let src = rom.root_folder();
        let moved = self.move_entries(&src, &self.cfg.realdata)?;

        let marker = rom.in_root_marker();
        common::touch(&marker).map_err(|e| MoveFailure::new(moved, &marker, format!("{:#}", e)))?;
        Ok(moved)
    }

    /// One `mv` per entry of `from`, skipping the preserved entry.
    fn move_entries(&self, from: &Path, to: &Path) -> Result<usize, MoveFailure> {
        let mut entries = Vec::new();
        let dir = fs::read_dir(from)
            .map_err(|e| MoveFailure::new(0, from, format!("open: {}", e)))?;
        for entry in dir {
            let entry = entry.map_err(|e| MoveFailure::new(0, from, format!("read entry: {}", e)))?;
            if entry.file_name() != PRESERVED_ENTRY {
                entries.push(entry.path());
            }
        }
        entries.sort();

        let busybox = self.cfg.busybox();
        let dest = format!("{}/", to.display());
        let mut moved = 0;
        for entry in entries {
            let args = vec!["mv".to_string(), entry.display().to_string(), dest.clone()];
            let failure = match self.runner.run_status(&busybox, &args) {
                Ok(0) => None,
                Ok(code) => Some(format!("mv exited with {}", code)),
                Err(e) => Some(format!("{:#}", e)),
            };

            if let Some(reason) = failure {
                tracing::error!("move of {} to {} failed: {}", entry.display(), dest, reason);
                return Err(MoveFailure {
                    moved,
                    failed: entry,
                    reason,
                });
            }
            moved += 1;
        }
        Ok(moved)
    }

    /// Swap `target` into the real root, replacing whichever ROM is there.
    ///
    /// Refused when no ROM is marked in root. On success the registry flags
    /// reflect the new occupant. Once the outgoing ROM's marker is gone, any
    /// failure is indeterminate even if no entry moved.
    pub fn swap(&self, registry: &mut RomRegistry, target: &str) -> Result<(), SwapError> {
        let in_root = registry
            .in_root()
            .cloned()
            .ok_or_else(|| SwapError::clean("no ROM is in root"))?;
        let target_rom = registry
            .get(target)
            .cloned()
            .ok_or_else(|| SwapError::clean(format!("unknown ROM {}", target)))?;

        let moved_out = self
            .out_of_root(&in_root)
            .map_err(|f| f.classify(0, false))?;
        if let Some(rom) = registry.get_mut(&in_root.name) {
            rom.is_in_root = false;
        }

        self.to_root(&target_rom)
            .map_err(|f| f.classify(moved_out, true))?;
        registry.set_in_root(target);
        Ok(())
    }
}
