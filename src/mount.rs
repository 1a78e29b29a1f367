//! Mount syscalls behind a small trait.
//!
//! The orchestrator bind-mounts ROM storage, attaches disk images to loop
//! devices and mounts removable partitions. All of that goes through
//! [`Mounter`] so the boot logic can be exercised without privileges.

use anyhow::{Context, Result};
use std::ffi::CString;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

const LOOP_MAJOR: u32 = 7;
const LOOP_SET_FD: u64 = 0x4C00;

/// Filesystem type used for ROM partitions and images.
pub const ROM_FS_TYPE: &str = "ext4";

pub trait Mounter: Send + Sync {
    /// Bind `src` onto `dst`, optionally read-only.
    fn bind(&self, src: &Path, dst: &Path, read_only: bool) -> Result<()>;

    /// Mount a block device with `noatime`, optionally read-only.
    fn mount(&self, device: &Path, dst: &Path, fs_type: &str, read_only: bool) -> Result<()>;

    /// Attach a disk image to a fresh loop device and return the device path.
    fn attach_loop(&self, image: &Path) -> Result<PathBuf>;

    fn unmount(&self, target: &Path) -> Result<()>;
}

/// Real mounts through libc.
///
/// Loop devices are created on demand with increasing minor numbers. Minors
/// are never handed out twice within a process, even after the image is
/// unmounted.
pub struct SysMounter {
    loop_dir: PathBuf,
    next_loop: AtomicU32,
}

impl SysMounter {
    pub fn new(loop_dir: impl Into<PathBuf>) -> Self {
        Self {
            loop_dir: loop_dir.into(),
            next_loop: AtomicU32::new(0),
        }
    }
}

impl Default for SysMounter {
    fn default() -> Self {
        Self::new("/dev")
    }
}

impl Mounter for SysMounter {
    fn bind(&self, src: &Path, dst: &Path, read_only: bool) -> Result<()> {
        sys_mount(Some(src), dst, None, libc::MS_BIND)
            .with_context(|| format!("Failed to bind {} to {}", src.display(), dst.display()))?;
        if read_only {
            // MS_RDONLY is ignored on the initial bind, it only applies on remount.
            sys_mount(
                None,
                dst,
                None,
                libc::MS_REMOUNT | libc::MS_BIND | libc::MS_RDONLY,
            )
            .with_context(|| format!("Failed to remount {} read-only", dst.display()))?;
        }
        Ok(())
    }

    fn mount(&self, device: &Path, dst: &Path, fs_type: &str, read_only: bool) -> Result<()> {
        let mut flags = libc::MS_NOATIME;
        if read_only {
            flags |= libc::MS_RDONLY;
        }
        sys_mount(Some(device), dst, Some(fs_type), flags).with_context(|| {
            format!(
                "Failed to mount {} ({}) on {}",
                device.display(),
                fs_type,
                dst.display()
            )
        })
    }

    fn attach_loop(&self, image: &Path) -> Result<PathBuf> {
        let image_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(image)
            .with_context(|| format!("Failed to open image {}", image.display()))?;

        let minor = self.next_loop.fetch_add(1, Ordering::SeqCst);
        let device = self.loop_dir.join(format!("loop{}", minor));
        let c_device = path_cstring(&device)?;

        let res = unsafe {
            libc::mknod(
                c_device.as_ptr(),
                libc::S_IFBLK | 0o777,
                libc::makedev(LOOP_MAJOR, minor),
            )
        };
        if res != 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::AlreadyExists {
                return Err(err)
                    .with_context(|| format!("Failed to create loop node {}", device.display()));
            }
        }

        let device_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&device)
            .with_context(|| format!("Failed to open loop device {}", device.display()))?;

        let res = unsafe {
            libc::ioctl(
                device_file.as_raw_fd(),
                LOOP_SET_FD as _,
                image_file.as_raw_fd(),
            )
        };
        if res < 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("LOOP_SET_FD failed on {}", device.display()));
        }

        tracing::debug!("attached {} to {}", image.display(), device.display());
        Ok(device)
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let c_target = path_cstring(target)?;
        let res = unsafe { libc::umount(c_target.as_ptr()) };
        if res != 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("Failed to unmount {}", target.display()));
        }
        Ok(())
    }
}

/// Flush filesystem buffers before handing control back to bootstrap.
pub fn sync_filesystems() {
    unsafe { libc::sync() };
}

fn path_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("Path contains NUL byte: {}", path.display()))
}

fn sys_mount(
    source: Option<&Path>,
    target: &Path,
    fs_type: Option<&str>,
    flags: libc::c_ulong,
) -> Result<()> {
    let target = path_cstring(target)?;
    let source = source.map(path_cstring).transpose()?;
    let fs_type = fs_type.map(CString::new).transpose()?;
    let data = CString::new("")?;

    let res = unsafe {
        libc::mount(
            source
                .as_ref()
                .map(|s| s.as_ptr())
                .unwrap_or(std::ptr::null()),
            target.as_ptr(),
            fs_type
                .as_ref()
                .map(|s| s.as_ptr())
                .unwrap_or(std::ptr::null()),
            flags,
            data.as_ptr() as *const libc::c_void,
        )
    };
    if res != 0 {
        return Err(io::Error::last_os_error()).context("mount failed");
    }
    Ok(())
}
