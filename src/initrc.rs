//! Android init script patching.
//!
//! The ROM's own ramdisk files live in `<rom>/boot`. They are installed into
//! the live root, with every `.rc` script rewritten so init does not mount
//! `/system` or `/data` itself: those are bind mounts set up beforehand.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::common;

/// Mode for installed scripts: owner rwx, group r-x.
pub const SCRIPT_MODE: u32 = 0o750;

/// No-op command that keeps an action block non-empty.
pub const PLACEHOLDER: &str = "    export ROMSWITCH_PLACEHOLDER 1\n";

const SDCARD_SERVICE: &str = "service sdcard";
const SDCARD_CLASS: &str = "    class main\n";

fn is_mount_line(line: &str) -> bool {
    line.contains("mount_all")
        || (line.contains("mount ") && (line.contains("/data") || line.contains("/system")))
}

/// Rewrite one init script.
pub fn patch_script(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 64);
    let mut block_empty = false;
    let mut lines = input.split_inclusive('\n');

    while let Some(line) = lines.next() {
        let trimmed = line.trim_start();

        if trimmed.starts_with("on ") {
            block_empty = true;
            out.push_str(line);
        } else if is_mount_line(line) {
            if block_empty {
                out.push_str(PLACEHOLDER);
                block_empty = false;
            }
            out.push('#');
            out.push_str(line);
        } else if line.starts_with(SDCARD_SERVICE) {
            out.push_str(line);
            if !line.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(SDCARD_CLASS);
            // drop the original class line
            lines.next();
        } else {
            if !(trimmed.is_empty() || trimmed.starts_with('#')) {
                block_empty = false;
            }
            out.push_str(line);
        }
    }
    out
}

fn is_script(name: &str) -> bool {
    name.contains(".rc")
}

/// Install `<rom>/boot` into `root`: scripts patched, everything else copied.
///
/// Returns the number of installed files.
pub fn install_boot_files(boot_dir: &Path, root: &Path) -> Result<usize> {
    if !boot_dir.is_dir() {
        anyhow::bail!("ROM boot folder {} does not exist", boot_dir.display());
    }

    let mut installed = 0;
    for entry in WalkDir::new(boot_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", boot_dir.display()))?;
        let rel = entry.path().strip_prefix(boot_dir)?;
        let dest = root.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)
                .with_context(|| format!("Failed to create {}", dest.display()))?;
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if is_script(&name) {
            let content = fs::read_to_string(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            common::write_file_mode(&dest, patch_script(&content), SCRIPT_MODE)?;
            tracing::debug!("patched {}", dest.display());
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    dest.display()
                )
            })?;
        }
        installed += 1;
    }

    tracing::info!(
        "installed {} boot file(s) from {}",
        installed,
        boot_dir.display()
    );
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_mount_lines_commented() {
        let input = "\
on fs
    mkdir /data
    mount ext4 /dev/block/mmcblk0p10 /data wait
    mount_all /fstab.grouper
    mount tmpfs tmpfs /tmp
";
        let expected = "\
on fs
    mkdir /data
#    mount ext4 /dev/block/mmcblk0p10 /data wait
#    mount_all /fstab.grouper
    mount tmpfs tmpfs /tmp
";
        assert_eq!(patch_script(input), expected);
    }

    #[test]
    fn test_placeholder_keeps_block_non_empty() {
        let input = "on fs\n    mount_all /fstab.grouper\n\non boot\n    write /x 1\n";
        let out = patch_script(input);
        assert_eq!(
            out,
            format!(
                "on fs\n{}#    mount_all /fstab.grouper\n\non boot\n    write /x 1\n",
                PLACEHOLDER
            )
        );
    }

    #[test]
    fn test_placeholder_emitted_once_per_block() {
        let input = "on fs\n    mount_all /a\n    mount yaffs2 mtd@system /system\n";
        let out = patch_script(input);
        assert_eq!(out.matches(PLACEHOLDER).count(), 1);
        assert!(out.ends_with("#    mount yaffs2 mtd@system /system\n"));
    }

    #[test]
    fn test_sdcard_service_moved_to_main() {
        let input = "\
service sdcard /system/bin/sdcard /data/media 1023 1023
    class late_start

service other /bin/x
    class late_start
";
        let expected = "\
service sdcard /system/bin/sdcard /data/media 1023 1023
    class main

service other /bin/x
    class late_start
";
        assert_eq!(patch_script(input), expected);
    }

    #[test]
    fn test_indented_sdcard_is_not_rewritten() {
        let input = "    service sdcard foo\n    class late_start\n";
        assert_eq!(patch_script(input), input);
    }

    #[test]
    fn test_missing_trailing_newline() {
        assert_eq!(patch_script("on init\n    mount_all x"), format!("on init\n{}#    mount_all x", PLACEHOLDER));
    }

    #[test]
    fn test_install_boot_files() {
        let tmp = TempDir::new().unwrap();
        let boot = tmp.path().join("rom/boot");
        let root = tmp.path().join("root");
        fs::create_dir_all(boot.join("sbin")).unwrap();
        fs::create_dir_all(&root).unwrap();
        fs::write(boot.join("init.rc"), "on fs\n    mount_all /fstab\n").unwrap();
        fs::write(boot.join("init.grouper.rc"), "on boot\n").unwrap();
        fs::write(boot.join("default.prop"), "ro.secure=1\n").unwrap();
        fs::write(boot.join("sbin/adbd"), b"\x7fELF").unwrap();

        let count = install_boot_files(&boot, &root).unwrap();
        assert_eq!(count, 4);

        let init_rc = fs::read_to_string(root.join("init.rc")).unwrap();
        assert!(init_rc.contains("#    mount_all"));
        let mode = fs::metadata(root.join("init.rc")).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, SCRIPT_MODE);

        assert_eq!(fs::read(root.join("sbin/adbd")).unwrap(), b"\x7fELF");
        assert_eq!(
            fs::read_to_string(root.join("default.prop")).unwrap(),
            "ro.secure=1\n"
        );
    }

    #[test]
    fn test_install_requires_boot_folder() {
        let tmp = TempDir::new().unwrap();
        assert!(install_boot_files(&tmp.path().join("missing"), tmp.path()).is_err());
    }
}
