//! Shared test utilities for romswitch tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tempfile::TempDir;

use romswitch::boot::{RomSelector, UiChoice};
use romswitch::config::Config;
use romswitch::rom::{INTERNAL_ROM_NAME, IN_ROOT_MARKER};
use romswitch::status::Status;
use romswitch::test_utils::{FakeMounter, FakeRunner};

/// A fake device tree under a temp directory plus the fakes that act on it.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub cfg: Config,
    pub runner: Arc<FakeRunner>,
    pub mounter: Arc<FakeMounter>,
}

impl TestEnv {
    /// Device with an `Internal` ROM in root and a populated data partition.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cfg = Config::for_testing(temp_dir.path());

        for dir in [&cfg.root, &cfg.proc_dir, &cfg.dev_block, &cfg.mnt_dir] {
            fs::create_dir_all(dir).expect("Failed to create device dir");
        }
        fs::create_dir_all(cfg.roms_dir()).expect("Failed to create roms dir");
        fs::write(cfg.proc_cmdline(), "console=ttyS0 androidboot.hardware=grouper\n")
            .expect("Failed to write cmdline");
        fs::write(cfg.kexec(), b"kexec-binary").expect("Failed to write kexec");
        fs::write(cfg.busybox(), b"busybox-binary").expect("Failed to write busybox");

        for entry in ["app", "dalvik-cache", "system"] {
            fs::create_dir_all(cfg.realdata.join(entry)).expect("Failed to populate realdata");
        }

        let runner = Arc::new(FakeRunner::busybox(&cfg));
        let env = Self {
            _temp_dir: temp_dir,
            cfg,
            runner,
            mounter: Arc::new(FakeMounter::new()),
        };
        env.add_internal(true);
        env
    }

    /// Device with no ROM folders at all, only the boot partition.
    pub fn bare() -> Self {
        let env = Self::new();
        fs::remove_dir_all(env.cfg.roms_dir().join(INTERNAL_ROM_NAME))
            .expect("Failed to remove Internal");
        fs::write(&env.cfg.boot_block, boot_image(b"STOCK-KERNEL", b"STOCK-RD", 2048, ""))
            .expect("Failed to write boot partition");
        env
    }

    pub fn rom_dir(&self, name: &str) -> PathBuf {
        self.cfg.roms_dir().join(name)
    }

    pub fn add_internal(&self, in_root: bool) {
        let dir = self.rom_dir(INTERNAL_ROM_NAME);
        fs::create_dir_all(&dir).expect("Failed to create Internal");
        if in_root {
            fs::write(dir.join(IN_ROOT_MARKER), "").expect("Failed to write marker");
        }
    }

    /// Android ROM with directory layout, an init script and a boot image.
    pub fn add_android(&self, name: &str, cmdline: &str) -> PathBuf {
        let dir = self.rom_dir(name);
        create_android_tree(&dir);
        fs::write(
            dir.join("boot.img"),
            boot_image(b"ANDROID-KERNEL", b"ANDROID-RAMDISK", 2048, cmdline),
        )
        .expect("Failed to write boot.img");
        dir
    }

    /// Ubuntu ROM with directory layout and kernel files in its root tree.
    pub fn add_ubuntu(&self, name: &str) -> PathBuf {
        let dir = self.rom_dir(name);
        let boot = dir.join("root/boot");
        fs::create_dir_all(&boot).expect("Failed to create ubuntu boot");
        fs::create_dir_all(dir.join("root/etc")).expect("Failed to create ubuntu etc");
        fs::write(boot.join("vmlinuz-3.1.10-8-nexus7"), b"vmlinuz").unwrap();
        fs::write(boot.join("initrd.img-3.1.10-8-nexus7"), b"initrd").unwrap();
        dir
    }

    /// What the booted Android's `/system/build.prop` would say.
    pub fn set_api_level(&self, api: u32) {
        let prop = self.cfg.in_root("system/build.prop");
        fs::create_dir_all(prop.parent().unwrap()).unwrap();
        fs::write(prop, format!("ro.build.version.sdk={}\n", api)).unwrap();
    }

    pub fn status_text(&self) -> String {
        fs::read_to_string(self.cfg.status_file()).unwrap_or_default()
    }
}

/// ROM tree shared by local and removable Android ROMs.
pub fn create_android_tree(dir: &Path) {
    for sub in ["system", "data", "cache", "boot"] {
        fs::create_dir_all(dir.join(sub)).expect("Failed to create android dir");
    }
    fs::write(
        dir.join("boot/init.rc"),
        "on fs\n    mount_all /fstab.grouper\n\nservice sdcard /system/bin/sdcard /data/media 1023 1023\n    class late_start\n",
    )
    .unwrap();
    fs::write(dir.join("boot/default.prop"), "ro.secure=1\n").unwrap();
}

/// Build a version 0 Android boot image.
pub fn boot_image(kernel: &[u8], ramdisk: &[u8], page: u32, cmdline: &str) -> Vec<u8> {
    let mut img = Vec::new();
    img.extend_from_slice(b"ANDROID!");
    for word in [
        kernel.len() as u32,
        0x1000_8000,
        ramdisk.len() as u32,
        0x1100_0000,
        0,
        0,
        0x1000_0100,
        page,
        0,
        0,
    ] {
        img.extend_from_slice(&word.to_le_bytes());
    }
    img.extend_from_slice(&[0u8; 16]);
    let mut cmd = [0u8; 512];
    cmd[..cmdline.len()].copy_from_slice(cmdline.as_bytes());
    img.extend_from_slice(&cmd);
    img.extend_from_slice(&[0u8; 32]);

    let page = page as usize;
    img.resize(page, 0);
    img.extend_from_slice(kernel);
    img.resize(page + kernel.len().div_ceil(page) * page, 0);
    img.extend_from_slice(ramdisk);
    img
}

/// Selector that returns a fixed answer and counts how often it was asked.
pub struct FixedSelector {
    pub choice: UiChoice,
    pub calls: usize,
}

impl FixedSelector {
    pub fn boot(name: &str) -> Self {
        Self {
            choice: UiChoice::Boot(name.to_string()),
            calls: 0,
        }
    }
}

impl RomSelector for FixedSelector {
    fn select(&mut self, _status: &mut Status, _refresh: &Receiver<()>) -> UiChoice {
        self.calls += 1;
        self.choice.clone()
    }
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.is_file(), "Expected file to exist: {}", path.display());
}

/// Assert that a file contains the given text.
pub fn assert_file_contains(path: &Path, needle: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    assert!(
        content.contains(needle),
        "Expected {} to contain '{}', got:\n{}",
        path.display(),
        needle,
        content
    );
}
