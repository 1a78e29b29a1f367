//! Kexec payload preparation and loading.
//!
//! Ubuntu ROMs carry their kernel and initrd as plain files in `boot/`;
//! Android ROMs carry a `boot.img` that is decoded first. Either way the
//! result is one `kexec --load-hardboot` invocation.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bootimg::BootImage;
use crate::common;
use crate::config::{Config, KEXEC_MEM_MIN, UBUNTU_CMDLINE};
use crate::process::ProcessRunner;
use crate::rom::Rom;

/// What gets handed to kexec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexecPayload {
    pub kernel: PathBuf,
    pub initrd: PathBuf,
    pub cmdline: String,
}

impl KexecPayload {
    pub fn args(&self) -> Vec<String> {
        vec![
            "--load-hardboot".to_string(),
            self.kernel.display().to_string(),
            format!("--mem-min={}", KEXEC_MEM_MIN),
            format!("--initrd={}", self.initrd.display()),
            format!("--command-line={}", self.cmdline),
        ]
    }
}

/// First non-hidden entry of `dir` whose name contains `name_part`.
///
/// Entries are tried in name order so the pick is stable.
pub fn find_file(dir: &Path, name_part: &str) -> Option<PathBuf> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.') && name.contains(name_part))
        .collect();
    names.sort();
    names.first().map(|name| dir.join(name))
}

/// Command line of the running kernel, first line only.
pub fn current_cmdline(cfg: &Config) -> Result<String> {
    let path = cfg.proc_cmdline();
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read kernel command line {}", path.display()))?;
    Ok(raw.lines().next().unwrap_or("").trim_end().to_string())
}

fn join_cmdline(base: &str, extra: &str) -> String {
    match (base.is_empty(), extra.is_empty()) {
        (true, _) => extra.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{} {}", base, extra),
    }
}

/// Kernel and initrd straight from the ROM's `boot` folder.
pub fn prepare_ubuntu(cfg: &Config, rom: &Rom) -> Result<KexecPayload> {
    let boot_dir = if rom.is_in_root {
        cfg.realdata.join("boot")
    } else {
        rom.root_folder().join("boot")
    };

    let kernel = find_file(&boot_dir, "vmlinuz")
        .with_context(|| format!("No vmlinuz found in {}", boot_dir.display()))?;
    let initrd = find_file(&boot_dir, "initrd.img")
        .with_context(|| format!("No initrd.img found in {}", boot_dir.display()))?;

    Ok(KexecPayload {
        kernel,
        initrd,
        cmdline: join_cmdline(&current_cmdline(cfg)?, UBUNTU_CMDLINE),
    })
}

/// Decode the ROM's boot image into `/zImage` and `/initrd.img`.
pub fn prepare_android(cfg: &Config, rom: &Rom) -> Result<KexecPayload> {
    let image_path = rom.boot_image_path();
    let image = BootImage::open(&image_path)
        .with_context(|| format!("Failed to open boot image {}", image_path.display()))?;

    let kernel = cfg.in_root("zImage");
    let initrd = cfg.in_root("initrd.img");
    image
        .extract_kernel(&kernel)
        .context("Failed to extract kernel")?;
    image
        .extract_ramdisk(&initrd)
        .context("Failed to extract ramdisk")?;

    Ok(KexecPayload {
        kernel,
        initrd,
        cmdline: join_cmdline(&current_cmdline(cfg)?, &image.header().cmdline()),
    })
}

pub struct KexecLoader<'a> {
    cfg: &'a Config,
    runner: &'a dyn ProcessRunner,
}

impl<'a> KexecLoader<'a> {
    pub fn new(cfg: &'a Config, runner: &'a dyn ProcessRunner) -> Self {
        Self { cfg, runner }
    }

    pub fn payload_for(&self, rom: &Rom) -> Result<KexecPayload> {
        if rom.rom_type.is_ubuntu() {
            prepare_ubuntu(self.cfg, rom)
        } else if rom.rom_type.is_android() {
            prepare_android(self.cfg, rom)
        } else {
            bail!("Unsupported ROM type to kexec ({})", rom.rom_type)
        }
    }

    /// Prepare the payload, load it, and cache the kexec binary in the ramdisk.
    pub fn load(&self, rom: &Rom) -> Result<KexecPayload> {
        let payload = self.payload_for(rom)?;
        let kexec = self.cfg.kexec();
        let args = payload.args();
        tracing::info!("loading kexec: {} {}", kexec.display(), args.join(" "));

        let code = self.runner.run_status(&kexec, &args)?;
        if code != 0 {
            bail!("kexec call failed (exit code {})", code);
        }

        let cached = self.cfg.kexec_cache();
        fs::copy(&kexec, &cached).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                kexec.display(),
                cached.display()
            )
        })?;
        common::set_mode(&cached, 0o755)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootimg::tests::build_image;
    use crate::rom::RomType;
    use crate::test_utils::FakeRunner;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config) {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::for_testing(tmp.path());
        fs::create_dir_all(&cfg.base_dir).unwrap();
        fs::create_dir_all(&cfg.root).unwrap();
        fs::create_dir_all(&cfg.proc_dir).unwrap();
        fs::write(cfg.proc_cmdline(), "console=ttyS0 androidboot.hw=grouper\n").unwrap();
        fs::write(cfg.kexec(), b"#!kexec").unwrap();
        (tmp, cfg)
    }

    fn ubuntu_rom(cfg: &Config) -> Rom {
        let base = cfg.roms_dir().join("Ubuntu");
        let boot = base.join("root/boot");
        fs::create_dir_all(&boot).unwrap();
        fs::write(boot.join("vmlinuz-3.1.10"), b"k").unwrap();
        fs::write(boot.join("initrd.img-3.1.10"), b"i").unwrap();
        fs::write(boot.join(".vmlinuz.swp"), b"").unwrap();
        Rom::probe("Ubuntu", &base, None)
    }

    #[test]
    fn test_find_file_skips_hidden_and_is_ordered() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".vmlinuz"), "").unwrap();
        fs::write(tmp.path().join("vmlinuz-b"), "").unwrap();
        fs::write(tmp.path().join("vmlinuz-a"), "").unwrap();
        assert_eq!(
            find_file(tmp.path(), "vmlinuz"),
            Some(tmp.path().join("vmlinuz-a"))
        );
        assert_eq!(find_file(tmp.path(), "initrd"), None);
        assert_eq!(find_file(&tmp.path().join("nope"), "x"), None);
    }

    #[test]
    fn test_ubuntu_payload() {
        let (_tmp, cfg) = setup();
        let rom = ubuntu_rom(&cfg);
        assert_eq!(rom.rom_type, RomType::UbuntuInternal);

        let payload = prepare_ubuntu(&cfg, &rom).unwrap();
        let boot = rom.root_folder().join("boot");
        assert_eq!(payload.kernel, boot.join("vmlinuz-3.1.10"));
        assert_eq!(payload.initrd, boot.join("initrd.img-3.1.10"));
        assert_eq!(
            payload.cmdline,
            format!("console=ttyS0 androidboot.hw=grouper {}", UBUNTU_CMDLINE)
        );
    }

    #[test]
    fn test_ubuntu_in_root_reads_live_boot() {
        let (_tmp, cfg) = setup();
        let mut rom = ubuntu_rom(&cfg);
        rom.is_in_root = true;
        fs::create_dir_all(cfg.realdata.join("boot")).unwrap();
        fs::write(cfg.realdata.join("boot/vmlinuz"), b"k").unwrap();
        fs::write(cfg.realdata.join("boot/initrd.img"), b"i").unwrap();

        let payload = prepare_ubuntu(&cfg, &rom).unwrap();
        assert_eq!(payload.kernel, cfg.realdata.join("boot/vmlinuz"));
    }

    #[test]
    fn test_ubuntu_missing_initrd() {
        let (_tmp, cfg) = setup();
        let rom = ubuntu_rom(&cfg);
        fs::remove_file(rom.root_folder().join("boot/initrd.img-3.1.10")).unwrap();
        let err = prepare_ubuntu(&cfg, &rom).unwrap_err();
        assert!(err.to_string().contains("initrd.img"));
    }

    #[test]
    fn test_android_load_invokes_kexec() {
        let (_tmp, cfg) = setup();
        let base = cfg.roms_dir().join("CM11");
        for d in ["system", "data", "cache"] {
            fs::create_dir_all(base.join(d)).unwrap();
        }
        fs::write(
            base.join("boot.img"),
            build_image(b"KERNEL", b"RAMDISK", 2048, "androidboot.selinux=permissive"),
        )
        .unwrap();
        let rom = Rom::probe("CM11", &base, None);
        let runner = FakeRunner::busybox(&cfg);

        let payload = KexecLoader::new(&cfg, &runner).load(&rom).unwrap();

        assert_eq!(fs::read(cfg.in_root("zImage")).unwrap(), b"KERNEL");
        assert_eq!(fs::read(cfg.in_root("initrd.img")).unwrap(), b"RAMDISK");
        assert_eq!(
            payload.cmdline,
            "console=ttyS0 androidboot.hw=grouper androidboot.selinux=permissive"
        );

        let calls = runner.calls_to(&cfg.kexec());
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            vec![
                "--load-hardboot".to_string(),
                cfg.in_root("zImage").display().to_string(),
                "--mem-min=0xA0000000".to_string(),
                format!("--initrd={}", cfg.in_root("initrd.img").display()),
                format!("--command-line={}", payload.cmdline),
            ]
        );

        let cached = cfg.kexec_cache();
        assert_eq!(fs::read(&cached).unwrap(), b"#!kexec");
        assert_eq!(fs::metadata(&cached).unwrap().permissions().mode() & 0o777, 0o755);
    }

    #[test]
    fn test_kexec_failure_is_error() {
        let (_tmp, cfg) = setup();
        let rom = ubuntu_rom(&cfg);
        let runner = FakeRunner::busybox(&cfg).with_kexec_exit(255);

        let err = KexecLoader::new(&cfg, &runner).load(&rom).unwrap_err();
        assert!(err.to_string().contains("kexec call failed"));
        assert!(!cfg.kexec_cache().exists());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let (_tmp, cfg) = setup();
        let base = cfg.roms_dir().join("Weird");
        fs::create_dir_all(&base).unwrap();
        let rom = Rom::probe("Weird", &base, None);
        let runner = FakeRunner::busybox(&cfg);
        assert!(KexecLoader::new(&cfg, &runner).load(&rom).is_err());
        assert!(runner.calls().is_empty());
    }
}
