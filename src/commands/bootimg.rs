//! Bootimg command - inspect and unpack Android boot images.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::bootimg::BootImage;

pub fn cmd_bootimg_info(path: &Path) -> Result<()> {
    let image = BootImage::open(path)
        .with_context(|| format!("Failed to read boot image {}", path.display()))?;
    let hdr = image.header();

    println!("Boot image: {}", path.display());
    println!("  board:     {}", hdr.board_name());
    println!("  page size: {}", hdr.page_size);
    println!(
        "  kernel:    {} bytes at {:#x} (load {:#010x})",
        hdr.kernel_size,
        hdr.kernel_offset(),
        hdr.kernel_addr
    );
    println!(
        "  ramdisk:   {} bytes at {:#x} (load {:#010x})",
        hdr.ramdisk_size,
        hdr.ramdisk_offset(),
        hdr.ramdisk_addr
    );
    println!("  second:    {} bytes", hdr.second_size);
    println!("  tags:      {:#010x}", hdr.tags_addr);
    println!("  cmdline:   {}", hdr.cmdline());
    Ok(())
}

/// Extract kernel and ramdisk as `zImage` and `initrd.img` under `out`.
pub fn cmd_bootimg_extract(path: &Path, out: &Path) -> Result<()> {
    let image = BootImage::open(path)
        .with_context(|| format!("Failed to read boot image {}", path.display()))?;
    fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;

    let kernel = out.join("zImage");
    let ramdisk = out.join("initrd.img");
    let k = image.extract_kernel(&kernel)?;
    let r = image.extract_ramdisk(&ramdisk)?;

    println!("  {} ({} bytes)", kernel.display(), k);
    println!("  {} ({} bytes)", ramdisk.display(), r);
    Ok(())
}
