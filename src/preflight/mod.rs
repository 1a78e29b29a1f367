//! Preflight checks for a romswitch install.
//!
//! Validates tools, kernel capabilities and the storage layout without
//! touching anything. Run with `romswitch preflight`.

mod checks;
mod types;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::process::ProcessRunner;

pub use checks::{has_kexec_hardboot, trampoline_version};
pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(cfg: &Config, runner: &dyn ProcessRunner) -> PreflightReport {
    let mut report = PreflightReport::default();

    tracing::info!("checking tools");
    report.checks.extend(checks::check_tools(cfg));

    tracing::info!("checking kernel");
    report.checks.extend(checks::check_kernel(cfg, runner));

    tracing::info!("checking storage layout");
    report.checks.extend(checks::check_layout(cfg));

    report
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(cfg: &Config, runner: &dyn ProcessRunner) -> Result<()> {
    let report = run_preflight(cfg, runner);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before booting.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
