//! Test doubles for the process and mount seams.
//!
//! [`FakeRunner`] records every invocation and emulates the handful of
//! busybox applets the orchestrator uses (`mv`, `dd`, `blkid`, `zcat`) on the
//! real filesystem, so root swaps and Internal ROM import can run inside a
//! temp directory. [`FakeMounter`] records mount calls without touching the
//! kernel.

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::config::Config;
use crate::mount::Mounter;
use crate::process::ProcessRunner;

/// One recorded process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

pub struct FakeRunner {
    busybox: Option<PathBuf>,
    kexec: Option<PathBuf>,
    fail_all: bool,
    calls: Mutex<Vec<Invocation>>,
    blkid: Mutex<String>,
    kernel_config: Mutex<Option<String>>,
    fail_moves: Mutex<HashSet<String>>,
    kexec_exit: AtomicI32,
}

impl FakeRunner {
    fn base(busybox: Option<PathBuf>, kexec: Option<PathBuf>, fail_all: bool) -> Self {
        Self {
            busybox,
            kexec,
            fail_all,
            calls: Mutex::new(Vec::new()),
            blkid: Mutex::new(String::new()),
            kernel_config: Mutex::new(None),
            fail_moves: Mutex::new(HashSet::new()),
            kexec_exit: AtomicI32::new(0),
        }
    }

    /// Emulates the busybox and kexec binaries configured in `cfg`.
    pub fn busybox(cfg: &Config) -> Self {
        Self::base(Some(cfg.busybox()), Some(cfg.kexec()), false)
    }

    /// Every program exits 1.
    pub fn failing() -> Self {
        Self::base(None, None, true)
    }

    pub fn with_blkid(self, output: &str) -> Self {
        self.set_blkid(output);
        self
    }

    pub fn set_blkid(&self, output: &str) {
        *self.blkid.lock().unwrap() = output.to_string();
    }

    /// Content served by `busybox zcat /proc/config.gz`.
    pub fn with_kernel_config(self, config: &str) -> Self {
        *self.kernel_config.lock().unwrap() = Some(config.to_string());
        self
    }

    pub fn with_kexec_exit(self, code: i32) -> Self {
        self.kexec_exit.store(code, Ordering::SeqCst);
        self
    }

    /// Make `mv` fail for any source whose file name is `name`.
    pub fn fail_move(&self, name: &str) {
        self.fail_moves.lock().unwrap().insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Argument lists of every invocation of `program`.
    pub fn calls_to(&self, program: &Path) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .map(|c| c.args)
            .collect()
    }

    /// Busybox invocations of one applet.
    pub fn applet_calls(&self, applet: &str) -> Vec<Vec<String>> {
        match &self.busybox {
            Some(busybox) => self
                .calls_to(busybox)
                .into_iter()
                .filter(|args| args.first().map(String::as_str) == Some(applet))
                .collect(),
            None => Vec::new(),
        }
    }

    fn dispatch(&self, program: &Path, args: &[String]) -> (i32, String) {
        if self.fail_all {
            return (1, String::new());
        }
        if self.kexec.as_deref() == Some(program) {
            return (self.kexec_exit.load(Ordering::SeqCst), String::new());
        }
        if self.busybox.as_deref() != Some(program) {
            return (0, String::new());
        }

        match args.first().map(String::as_str) {
            Some("mv") if args.len() == 3 => (self.emulate_mv(&args[1], &args[2]), String::new()),
            Some("dd") => (emulate_dd(&args[1..]), String::new()),
            Some("blkid") => (0, self.blkid.lock().unwrap().clone()),
            Some("zcat") => match self.kernel_config.lock().unwrap().clone() {
                Some(config) => (0, config),
                None => (1, String::new()),
            },
            _ => (0, String::new()),
        }
    }

    fn emulate_mv(&self, src: &str, dst: &str) -> i32 {
        let src = PathBuf::from(src);
        let Some(name) = src.file_name() else {
            return 1;
        };
        if self
            .fail_moves
            .lock()
            .unwrap()
            .contains(name.to_string_lossy().as_ref())
        {
            return 1;
        }
        let dst_path = PathBuf::from(dst);
        let target = if dst.ends_with('/') || dst_path.is_dir() {
            dst_path.join(name)
        } else {
            dst_path
        };
        match fs::rename(&src, &target) {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }
}

fn emulate_dd(args: &[String]) -> i32 {
    let input = args.iter().find_map(|a| a.strip_prefix("if="));
    let output = args.iter().find_map(|a| a.strip_prefix("of="));
    match (input, output) {
        (Some(input), Some(output)) => match fs::copy(input, output) {
            Ok(_) => 0,
            Err(_) => 1,
        },
        _ => 1,
    }
}

impl ProcessRunner for FakeRunner {
    fn run_status(&self, program: &Path, args: &[String]) -> Result<i32> {
        self.calls.lock().unwrap().push(Invocation {
            program: program.to_path_buf(),
            args: args.to_vec(),
        });
        Ok(self.dispatch(program, args).0)
    }

    fn run_stdout(&self, program: &Path, args: &[String]) -> Result<String> {
        self.calls.lock().unwrap().push(Invocation {
            program: program.to_path_buf(),
            args: args.to_vec(),
        });
        let (code, stdout) = self.dispatch(program, args);
        if code != 0 {
            bail!("'{}' failed (exit code {})", program.display(), code);
        }
        Ok(stdout)
    }
}

/// One recorded mount operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    Bind {
        src: PathBuf,
        dst: PathBuf,
        read_only: bool,
    },
    Mount {
        device: PathBuf,
        dst: PathBuf,
        fs_type: String,
        read_only: bool,
    },
    AttachLoop {
        image: PathBuf,
        device: PathBuf,
    },
    Unmount {
        target: PathBuf,
    },
}

#[derive(Default)]
pub struct FakeMounter {
    calls: Mutex<Vec<MountCall>>,
    fail: Mutex<HashSet<PathBuf>>,
    next_loop: AtomicU32,
}

impl FakeMounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any mount whose source (device, bind source or image) is `source`.
    pub fn fail_on(&self, source: impl Into<PathBuf>) {
        self.fail.lock().unwrap().insert(source.into());
    }

    pub fn calls(&self) -> Vec<MountCall> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, source: &Path, dst: Option<&Path>) -> Result<()> {
        if self.fail.lock().unwrap().contains(source) {
            bail!("mount of {} refused", source.display());
        }
        if let Some(dst) = dst {
            if !dst.exists() {
                bail!("mount point {} does not exist", dst.display());
            }
        }
        Ok(())
    }
}

impl Mounter for FakeMounter {
    fn bind(&self, src: &Path, dst: &Path, read_only: bool) -> Result<()> {
        self.check(src, Some(dst))?;
        self.calls.lock().unwrap().push(MountCall::Bind {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            read_only,
        });
        Ok(())
    }

    fn mount(&self, device: &Path, dst: &Path, fs_type: &str, read_only: bool) -> Result<()> {
        self.check(device, Some(dst))?;
        self.calls.lock().unwrap().push(MountCall::Mount {
            device: device.to_path_buf(),
            dst: dst.to_path_buf(),
            fs_type: fs_type.to_string(),
            read_only,
        });
        Ok(())
    }

    fn attach_loop(&self, image: &Path) -> Result<PathBuf> {
        self.check(image, None)?;
        let minor = self.next_loop.fetch_add(1, Ordering::SeqCst);
        let device = PathBuf::from(format!("/dev/loop{}", minor));
        self.calls.lock().unwrap().push(MountCall::AttachLoop {
            image: image.to_path_buf(),
            device: device.clone(),
        });
        Ok(device)
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(MountCall::Unmount {
            target: target.to_path_buf(),
        });
        Ok(())
    }
}
