//! Device checks: tools, kernel capabilities, storage layout.

use anyhow::Result;

use crate::config::Config;
use crate::process::{self, ProcessRunner};
use crate::rom::INTERNAL_ROM_NAME;

use super::types::CheckResult;

const HARDBOOT_OPTION: &str = "CONFIG_KEXEC_HARDBOOT=y";

/// Busybox is required; kexec only matters for ROMs with their own kernel.
pub fn check_tools(cfg: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    for (name, path, required) in [("busybox", cfg.busybox(), true), ("kexec", cfg.kexec(), false)] {
        let result = match process::resolve_tool(&path) {
            Some(found) if found == path => CheckResult::pass_with(name, found.display().to_string()),
            Some(found) => CheckResult::warn(
                name,
                format!(
                    "not at {}, only found on PATH at {}",
                    path.display(),
                    found.display()
                ),
            ),
            None if required => CheckResult::fail(name, format!("not found at {}", path.display())),
            None => CheckResult::warn(
                name,
                format!("not found at {}, only Internal can boot", path.display()),
            ),
        };
        results.push(result);
    }
    results
}

/// Whether the running kernel was built with hardboot kexec support.
///
/// A kernel without `/proc/config.gz` reports `false`.
pub fn has_kexec_hardboot(cfg: &Config, runner: &dyn ProcessRunner) -> Result<bool> {
    let config_gz = cfg.proc_config_gz();
    if !config_gz.exists() {
        return Ok(false);
    }
    let config = runner.run_stdout(
        &cfg.busybox(),
        &["zcat".to_string(), config_gz.display().to_string()],
    )?;
    Ok(config.lines().any(|line| line.trim() == HARDBOOT_OPTION))
}

/// Version reported by the ramdisk's `init -v`, if it is the trampoline.
pub fn trampoline_version(cfg: &Config, runner: &dyn ProcessRunner) -> Option<i32> {
    let init = cfg.in_root("init");
    let out = runner.run_stdout(&init, &["-v".to_string()]).ok()?;
    let digits: String = out.trim().chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

pub fn check_kernel(cfg: &Config, runner: &dyn ProcessRunner) -> Vec<CheckResult> {
    let mut results = Vec::new();

    results.push(match has_kexec_hardboot(cfg, runner) {
        Ok(true) => CheckResult::pass("kexec-hardboot"),
        Ok(false) => CheckResult::warn(
            "kexec-hardboot",
            "running kernel lacks CONFIG_KEXEC_HARDBOOT, ROMs with their own kernel will not boot",
        ),
        Err(e) => CheckResult::warn("kexec-hardboot", format!("could not read kernel config: {:#}", e)),
    });

    results.push(match trampoline_version(cfg, runner) {
        Some(ver) => CheckResult::pass_with("trampoline", format!("version {}", ver)),
        None => CheckResult::warn("trampoline", "init did not report a version"),
    });
    results
}

pub fn check_layout(cfg: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();
    let roms = cfg.roms_dir();

    if roms.is_dir() {
        results.push(CheckResult::pass_with("roms dir", roms.display().to_string()));
    } else {
        results.push(CheckResult::fail(
            "roms dir",
            format!("{} does not exist", roms.display()),
        ));
    }

    let internal = roms.join(INTERNAL_ROM_NAME);
    if internal.is_dir() {
        results.push(CheckResult::pass("Internal ROM"));
    } else {
        results.push(CheckResult::warn(
            "Internal ROM",
            format!(
                "missing, will be created from {} on next run",
                cfg.boot_block.display()
            ),
        ));
    }

    if cfg.realdata.is_dir() {
        results.push(CheckResult::pass_with("realdata", cfg.realdata.display().to_string()));
    } else {
        results.push(CheckResult::fail(
            "realdata",
            format!("{} is not mounted", cfg.realdata.display()),
        ));
    }
    results
}
