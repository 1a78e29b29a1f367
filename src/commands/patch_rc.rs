//! Patch-rc command - print the patched form of an init script.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::initrc;

pub fn cmd_patch_rc(path: &Path) -> Result<()> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    print!("{}", initrc::patch_script(&content));
    Ok(())
}
