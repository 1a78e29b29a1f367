//! Android userspace setup inside the ramdisk.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::chown;
use std::path::{Path, PathBuf};

use crate::common;
use crate::config::Config;
use crate::mount::{Mounter, ROM_FS_TYPE};
use crate::rom::{Rom, RomType};

const AID_SYSTEM: u32 = 1000;
const AID_CACHE: u32 = 2001;

/// Marker telling Android 4.2+ that `/data/media` uses the per-user layout.
pub const LAYOUT_VERSION_FILE: &str = "data/.layout_version";
const LAYOUT_VERSION: &str = "2";

struct MountPoint {
    name: &'static str,
    mode: u32,
    owner: Option<(u32, u32)>,
    read_only: bool,
}

const MOUNT_POINTS: [MountPoint; 3] = [
    MountPoint {
        name: "system",
        mode: 0o755,
        owner: None,
        read_only: true,
    },
    MountPoint {
        name: "data",
        mode: 0o771,
        owner: Some((AID_SYSTEM, AID_SYSTEM)),
        read_only: false,
    },
    MountPoint {
        name: "cache",
        mode: 0o770,
        owner: Some((AID_SYSTEM, AID_CACHE)),
        read_only: false,
    },
];

/// True when the running ramdisk belongs to an Android kernel.
pub fn is_android_kernel(cfg: &Config) -> bool {
    cfg.in_root("init.rc").exists()
}

/// Create `/system`, `/data` and `/cache` and mount the ROM's storage on them.
///
/// Directory layouts are bind mounted; image layouts go through loop devices.
/// Ownership changes are best effort.
pub fn setup_android_mounts(cfg: &Config, mounter: &dyn Mounter, rom: &Rom) -> Result<()> {
    let images = match rom.rom_type {
        RomType::AndroidInternal | RomType::AndroidUsbDir => false,
        RomType::AndroidUsbImg => true,
        other => bail!("ROM {} is not an Android ROM ({})", rom.name, other),
    };

    for point in &MOUNT_POINTS {
        let target = cfg.in_root(point.name);
        common::create_dir_mode(&target, point.mode)?;
        if let Some((uid, gid)) = point.owner {
            if let Err(e) = chown(&target, Some(uid), Some(gid)) {
                tracing::warn!("failed to chown {}: {}", target.display(), e);
            }
        }

        if images {
            let image = rom.base_path.join(format!("{}.img", point.name));
            let device = mounter.attach_loop(&image)?;
            mounter.mount(&device, &target, ROM_FS_TYPE, point.read_only)?;
        } else {
            let src = rom.base_path.join(point.name);
            mounter.bind(&src, &target, point.read_only)?;
        }
        tracing::debug!("mounted {} of {}", target.display(), rom.name);
    }
    Ok(())
}

/// Read `ro.build.version.sdk` from a `build.prop`.
///
/// A missing key or a value that is not a positive integer is an error.
pub fn api_level(build_prop: &Path) -> Result<i32> {
    let content = fs::read_to_string(build_prop)
        .with_context(|| format!("Could not open {} to read api level", build_prop.display()))?;

    let Some(value) = content
        .lines()
        .find_map(|line| line.strip_prefix("ro.build.version.sdk="))
    else {
        bail!("No ro.build.version.sdk in {}", build_prop.display());
    };

    match value.trim().parse::<i32>() {
        Ok(level) if level > 0 => Ok(level),
        _ => bail!("Invalid ro.build.version.sdk line in build.prop: '{}'", value.trim()),
    }
}

/// Source and target of the media bind for `api` and the data layout.
pub fn media_paths(cfg: &Config, api: i32, media_new: bool) -> (PathBuf, PathBuf) {
    let real_media = cfg.realdata.join("media");
    let data_media = cfg.in_root("data/media");
    if api <= 16 {
        let from = if media_new {
            real_media.join("0")
        } else {
            real_media
        };
        (from, data_media)
    } else {
        let to = if media_new {
            data_media
        } else {
            data_media.join("0")
        };
        (real_media, to)
    }
}

/// Expose the shared storage where the booted Android expects it.
pub fn bind_media(cfg: &Config, mounter: &dyn Mounter) -> Result<()> {
    let api = api_level(&cfg.in_root("system/build.prop"))?;
    let media_new = cfg.realdata.join("media/0").exists();
    let (from, to) = media_paths(cfg, api, media_new);

    tracing::info!(
        "media bind: api {}, media_new {}, {} to {}",
        api,
        media_new,
        from.display(),
        to.display()
    );
    common::create_dir_mode(&to, 0o775).context("Failed to make media dir")?;
    mounter
        .bind(&from, &to, false)
        .context("Failed to bind media folder")?;

    if api >= 17 {
        common::write_file_mode(cfg.in_root(LAYOUT_VERSION_FILE), LAYOUT_VERSION, 0o600)
            .context("Failed to create .layout_version")?;
    }
    Ok(())
}
