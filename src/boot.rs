//! Boot preparation and the top-level orchestration run.
//!
//! [`BootPreparer::prepare`] walks one target ROM through
//! `KexecAttempt → RootSwapCheck → TypeFinalize` and reports what the caller
//! has to do next as an [`ExitAction`]. [`run`] wraps it with status loading,
//! ROM selection while the partition monitor is live, and teardown.

use anyhow::{anyhow, Result};
use bitflags::bitflags;
use std::fmt;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use thiserror::Error;

use crate::android;
use crate::config::Config;
use crate::initrc;
use crate::kexec::KexecLoader;
use crate::mount::{self, Mounter};
use crate::partition::{PartitionMonitor, PartitionScanner};
use crate::process::ProcessRunner;
use crate::rom::{Rom, RomType};
use crate::status::Status;
use crate::swap::{RootSwapper, SwapError};

bitflags! {
    /// What bootstrap has to do once the orchestrator returns.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExitAction: u32 {
        const REBOOT = 0x01;
        const REBOOT_RECOVERY = 0x02;
        const REBOOT_BOOTLOADER = 0x04;
        const SHUTDOWN = 0x08;
        /// Unmount everything before continuing the boot.
        const UMOUNT = 0x10;
        /// A new kernel is loaded and must be executed.
        const KEXEC = 0x20;
    }
}

impl ExitAction {
    /// True when the boot continues on the running kernel.
    pub fn stays_on_current_kernel(self) -> bool {
        !self.intersects(ExitAction::REBOOT | ExitAction::KEXEC)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    KexecAttempt,
    RootSwapCheck,
    TypeFinalize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Start => "start",
            Phase::KexecAttempt => "kexec",
            Phase::RootSwapCheck => "root swap",
            Phase::TypeFinalize => "finalize",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error(transparent)]
    RootSwap(#[from] SwapError),

    #[error("boot prepare failed in {phase} phase: {cause:#}")]
    Phase { phase: Phase, cause: anyhow::Error },
}

impl PrepareError {
    fn at(phase: Phase, cause: anyhow::Error) -> Self {
        PrepareError::Phase { phase, cause }
    }

    pub fn phase(&self) -> Phase {
        match self {
            PrepareError::RootSwap(_) => Phase::RootSwapCheck,
            PrepareError::Phase { phase, .. } => *phase,
        }
    }

    /// True when the live root may have been left half swapped.
    pub fn root_indeterminate(&self) -> bool {
        matches!(self, PrepareError::RootSwap(e) if !e.is_clean())
    }
}

/// Span wrapping one prepare phase; its close event carries the timing.
fn phase_span(phase: Phase) -> tracing::Span {
    tracing::info_span!("phase", name = %phase)
}

pub struct BootPreparer<'a> {
    cfg: &'a Config,
    runner: &'a dyn ProcessRunner,
    mounter: &'a dyn Mounter,
}

impl<'a> BootPreparer<'a> {
    pub fn new(cfg: &'a Config, runner: &'a dyn ProcessRunner, mounter: &'a dyn Mounter) -> Self {
        Self {
            cfg,
            runner,
            mounter,
        }
    }

    /// Get the system ready to hand over to `target`.
    pub fn prepare(&self, status: &mut Status, target: &str) -> Result<ExitAction, PrepareError> {
        let rom = status
            .registry
            .get(target)
            .cloned()
            .ok_or_else(|| PrepareError::at(Phase::Start, anyhow!("unknown ROM {}", target)))?;
        if rom.is_orphaned() {
            return Err(PrepareError::at(
                Phase::Start,
                anyhow!("partition holding ROM {} is gone", rom.name),
            ));
        }
        tracing::info!("preparing {} ({})", rom.name, rom.rom_type);

        let mut exit = ExitAction::UMOUNT;

        if rom.has_boot_image && rom.rom_type != RomType::Default && !status.is_second_boot {
            phase_span(Phase::KexecAttempt)
                .in_scope(|| KexecLoader::new(self.cfg, self.runner).load(&rom))
                .map_err(|e| PrepareError::at(Phase::KexecAttempt, e))?;
            exit |= ExitAction::KEXEC;
        }

        if status.current_rom.as_deref() == Some(target) {
            tracing::debug!("to-boot ROM is the same as previous ROM");
        }

        if !rom.is_in_root
            && matches!(rom.rom_type, RomType::UbuntuInternal | RomType::Default)
        {
            phase_span(Phase::RootSwapCheck).in_scope(|| {
                RootSwapper::new(self.cfg, self.runner).swap(&mut status.registry, target)
            })?;
        }

        phase_span(Phase::TypeFinalize)
            .in_scope(|| self.finalize(&rom, &mut exit))
            .map_err(|e| PrepareError::at(Phase::TypeFinalize, e))?;

        tracing::info!("prepared {}: {:?}", rom.name, exit);
        Ok(exit)
    }

    fn finalize(&self, rom: &Rom, exit: &mut ExitAction) -> Result<()> {
        let staying = exit.stays_on_current_kernel();
        match rom.rom_type {
            RomType::Default => Ok(()),
            RomType::UbuntuInternal => {
                if staying && android::is_android_kernel(self.cfg) {
                    anyhow::bail!("Trying to boot ubuntu with android boot.img, aborting");
                }
                Ok(())
            }
            RomType::AndroidInternal | RomType::AndroidUsbDir | RomType::AndroidUsbImg => {
                if staying {
                    exit.remove(ExitAction::UMOUNT);
                }
                initrc::install_boot_files(&rom.base_path.join("boot"), &self.cfg.root)?;
                android::setup_android_mounts(self.cfg, self.mounter, rom)?;
                android::bind_media(self.cfg, self.mounter)?;
                if let Some(part) = rom.partition() {
                    part.set_keep_mounted();
                }
                if staying && !android::is_android_kernel(self.cfg) {
                    anyhow::bail!("Trying to boot android with ubuntu boot.img, aborting");
                }
                Ok(())
            }
            RomType::UbuntuUsbDir | RomType::UbuntuUsbImg => {
                anyhow::bail!("Booting Ubuntu from removable media is not supported")
            }
            RomType::Unknown => anyhow::bail!("Unknown ROM type for {}", rom.name),
        }
    }
}

/// Result of interactive ROM selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiChoice {
    Boot(String),
    Reboot,
    RebootRecovery,
    RebootBootloader,
    Shutdown,
}

impl UiChoice {
    /// Exit action for choices that do not boot a ROM.
    fn exit_action(&self) -> Option<ExitAction> {
        let action = match self {
            UiChoice::Boot(_) => return None,
            UiChoice::Reboot => ExitAction::REBOOT,
            UiChoice::RebootRecovery => ExitAction::REBOOT_RECOVERY,
            UiChoice::RebootBootloader => ExitAction::REBOOT_BOOTLOADER,
            UiChoice::Shutdown => ExitAction::SHUTDOWN,
        };
        Some(action | ExitAction::UMOUNT)
    }
}

/// Picks what to do. `refresh` fires whenever the partition list changed;
/// the selector should call [`Status::rescan_usb`] before showing ROMs again.
pub trait RomSelector {
    fn select(&mut self, status: &mut Status, refresh: &Receiver<()>) -> UiChoice;
}

/// One full orchestration run: load status, select, prepare, persist.
///
/// A failed prepare is logged and turned into a plain reboot; the status file
/// is left as it was.
pub fn run(
    cfg: &Config,
    runner: Arc<dyn ProcessRunner>,
    mounter: Arc<dyn Mounter>,
    selector: &mut dyn RomSelector,
) -> Result<ExitAction> {
    let mut status = Status::load(cfg, runner.as_ref())?;
    let mut exit = ExitAction::REBOOT | ExitAction::UMOUNT;

    let to_boot = if status.is_second_boot {
        tracing::info!("skipping ROM selection because of is_second_boot=1");
        status.current_rom.clone()
    } else {
        let scanner = PartitionScanner::new(cfg.clone(), Arc::clone(&runner), Arc::clone(&mounter));
        let (tx, rx) = mpsc::channel();
        let monitor = PartitionMonitor::start(
            scanner,
            Arc::clone(&status.partitions),
            cfg.dev_block.clone(),
            cfg.poll_interval,
            move || {
                let _ = tx.send(());
            },
        )?;
        let choice = selector.select(&mut status, &rx);
        monitor.stop();

        tracing::info!("selected: {:?}", choice);
        // A rescan after selection replaces the partitions removable ROMs point to.
        if let UiChoice::Boot(name) = &choice {
            if status.registry.get(name).is_some_and(Rom::is_removable) {
                status.rescan_usb();
            }
        }
        match choice.exit_action() {
            Some(action) => {
                exit = action;
                None
            }
            None => match choice {
                UiChoice::Boot(name) => Some(name),
                _ => None,
            },
        }
    };

    if let Some(name) = to_boot {
        let preparer = BootPreparer::new(cfg, runner.as_ref(), mounter.as_ref());
        match preparer.prepare(&mut status, &name) {
            Ok(action) => exit = action,
            Err(e) => {
                tracing::error!("{}", e);
                if e.root_indeterminate() {
                    tracing::error!("live root is in an indeterminate state, not booting");
                }
                status.partitions.release_all(mounter.as_ref());
                mount::sync_filesystems();
                return Ok(ExitAction::REBOOT);
            }
        }

        let android = status
            .registry
            .get(&name)
            .is_some_and(|rom| rom.rom_type.is_android());
        status.is_second_boot =
            !status.is_second_boot && android && exit.contains(ExitAction::KEXEC);
        status.current_rom = Some(name);
    }

    if let Err(e) = status.save(cfg) {
        tracing::warn!("{:#}", e);
    }
    status.partitions.release_all(mounter.as_ref());
    mount::sync_filesystems();
    Ok(exit)
}
