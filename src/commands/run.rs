//! Run command - the full orchestration pass.

use anyhow::Result;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::boot::{self, ExitAction, RomSelector, UiChoice};
use crate::config::Config;
use crate::mount::SysMounter;
use crate::process::SystemRunner;
use crate::status::Status;

/// Non-interactive selector driven by command-line flags.
///
/// With no explicit choice it boots the auto-boot ROM, else the current ROM.
pub struct CliSelector {
    choice: Option<UiChoice>,
    wait_usb: Option<Duration>,
}

impl CliSelector {
    pub fn new(choice: Option<UiChoice>, wait_usb: Option<Duration>) -> Self {
        Self { choice, wait_usb }
    }

    /// Give removable media time to show up, refreshing on each change.
    fn wait_for_partitions(&self, status: &mut Status, refresh: &Receiver<()>) {
        let Some(wait) = self.wait_usb else {
            return;
        };
        tracing::info!("waiting {}s for removable media", wait.as_secs());
        let deadline = Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            match refresh.recv_timeout(left) {
                Ok(()) => {
                    status.rescan_usb();
                    tracing::info!(
                        "partitions changed, {} ROM(s) known",
                        status.registry.len()
                    );
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if refresh.try_iter().count() > 0 {
            status.rescan_usb();
        }
    }
}

impl RomSelector for CliSelector {
    fn select(&mut self, status: &mut Status, refresh: &Receiver<()>) -> UiChoice {
        self.wait_for_partitions(status, refresh);

        if let Some(choice) = self.choice.take() {
            return choice;
        }
        if let Some(rom) = status.auto_boot() {
            tracing::info!("auto-booting {}", rom.name);
            return UiChoice::Boot(rom.name.clone());
        }
        match status.current() {
            Some(rom) => UiChoice::Boot(rom.name.clone()),
            None => UiChoice::Reboot,
        }
    }
}

/// Execute the run command and return the exit action for bootstrap.
pub fn cmd_run(config: &Config, choice: Option<UiChoice>, wait_usb: Option<u64>) -> Result<ExitAction> {
    let mut selector = CliSelector::new(choice, wait_usb.map(Duration::from_secs));
    let exit = boot::run(
        config,
        Arc::new(SystemRunner),
        Arc::new(SysMounter::default()),
        &mut selector,
    )?;
    println!("exit action: {:?} ({:#04x})", exit, exit.bits());
    Ok(exit)
}
