//! Background hot-plug detection.
//!
//! No uevent source is assumed. The monitor polls the change time of the
//! block-device directory and rescans whenever it moves forward.

use anyhow::{Context, Result};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{PartitionScanner, PartitionTable};

const STOP_CHECK: Duration = Duration::from_millis(50);

/// Handle to the running monitor thread. Dropping it stops the thread.
pub struct PartitionMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PartitionMonitor {
    /// Spawn the monitor.
    ///
    /// `on_refresh` runs on the monitor thread after every successful rescan,
    /// with the table lock already released.
    pub fn start<F>(
        scanner: PartitionScanner,
        table: Arc<PartitionTable>,
        dev_block: PathBuf,
        interval: Duration,
        on_refresh: F,
    ) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("partition-monitor".to_string())
            .spawn(move || {
                let mut last_change: Option<(i64, i64)> = None;
                while !thread_stop.load(Ordering::SeqCst) {
                    if let Some(stamp) = change_stamp(&dev_block) {
                        if last_change.map_or(true, |last| stamp > last) {
                            match scanner.rescan(&table) {
                                Ok(count) => {
                                    tracing::debug!("partition rescan: {} mounted", count);
                                    on_refresh();
                                }
                                Err(e) => tracing::warn!("partition rescan failed: {:#}", e),
                            }
                            last_change = Some(stamp);
                        }
                    }
                    sleep_unless_stopped(&thread_stop, interval);
                }
                tracing::debug!("partition monitor stopped");
            })
            .context("Failed to spawn partition monitor thread")?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for its current cycle to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("partition monitor thread panicked");
            }
        }
    }
}

impl Drop for PartitionMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Change time of `path` with nanosecond resolution.
fn change_stamp(path: &Path) -> Option<(i64, i64)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.ctime(), meta.ctime_nsec()))
}

fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(STOP_CHECK.min(deadline - now));
    }
}
