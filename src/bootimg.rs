//! Android boot image decoding.
//!
//! Layout of a (version 0) boot image:
//!
//! ```text
//! +-----------------+ 0
//! | header          |
//! +-----------------+ page_size
//! | kernel          | ceil(kernel_size / page_size) pages
//! +-----------------+
//! | ramdisk         | ramdisk_size bytes
//! +-----------------+
//! ```

use binrw::BinRead;
use std::fs::{self, File};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const BOOT_MAGIC: &[u8; 8] = b"ANDROID!";

#[derive(Debug, Error)]
pub enum BootImageError {
    #[error("I/O error on boot image: {0}")]
    Io(#[from] io::Error),

    #[error("not an Android boot image (bad magic)")]
    BadMagic,

    #[error("invalid page size {0}")]
    InvalidPageSize(u32),

    #[error("malformed boot image header: {0}")]
    Header(String),

    #[error("{what} truncated: expected {expected} bytes at offset {offset}, got {got}")]
    Truncated {
        what: &'static str,
        offset: u64,
        expected: u64,
        got: u64,
    },
}

impl From<binrw::Error> for BootImageError {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(e) => BootImageError::Io(e),
            binrw::Error::BadMagic { .. } => BootImageError::BadMagic,
            other => BootImageError::Header(other.to_string()),
        }
    }
}

/// Fixed-layout header at the start of `boot.img`.
#[derive(BinRead, Debug, Clone, PartialEq, Eq)]
#[br(little, magic = b"ANDROID!")]
pub struct BootImageHeader {
    pub kernel_size: u32,
    pub kernel_addr: u32,
    pub ramdisk_size: u32,
    pub ramdisk_addr: u32,
    pub second_size: u32,
    pub second_addr: u32,
    pub tags_addr: u32,
    pub page_size: u32,
    pub unused: [u32; 2],
    pub name: [u8; 16],
    pub cmdline: [u8; 512],
    pub id: [u32; 8],
}

impl BootImageHeader {
    /// Size of the header on disk, magic included.
    pub const SIZE: u64 = 608;

    /// Embedded kernel command line, up to the first NUL.
    pub fn cmdline(&self) -> String {
        c_string(&self.cmdline)
    }

    pub fn board_name(&self) -> String {
        c_string(&self.name)
    }

    pub fn kernel_offset(&self) -> u64 {
        u64::from(self.page_size)
    }

    /// Kernel region is padded to whole pages; the ramdisk starts right after.
    pub fn ramdisk_offset(&self) -> u64 {
        let page = u64::from(self.page_size);
        let kernel_pages = u64::from(self.kernel_size).div_ceil(page);
        page + kernel_pages * page
    }
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// An opened boot image with a validated header.
#[derive(Debug)]
pub struct BootImage {
    path: PathBuf,
    header: BootImageHeader,
}

impl BootImage {
    pub fn open(path: &Path) -> Result<Self, BootImageError> {
        let mut reader = BufReader::new(File::open(path)?);
        let header = BootImageHeader::read(&mut reader)?;
        if header.page_size == 0 {
            return Err(BootImageError::InvalidPageSize(header.page_size));
        }
        Ok(Self {
            path: path.to_path_buf(),
            header,
        })
    }

    pub fn header(&self) -> &BootImageHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn extract_kernel(&self, dest: &Path) -> Result<u64, BootImageError> {
        self.extract(
            "kernel",
            self.header.kernel_offset(),
            u64::from(self.header.kernel_size),
            dest,
        )
    }

    pub fn extract_ramdisk(&self, dest: &Path) -> Result<u64, BootImageError> {
        self.extract(
            "ramdisk",
            self.header.ramdisk_offset(),
            u64::from(self.header.ramdisk_size),
            dest,
        )
    }

    /// Copy exactly `size` bytes from `offset` to `dest`.
    ///
    /// A short source removes the partial output and reports truncation.
    fn extract(
        &self,
        what: &'static str,
        offset: u64,
        size: u64,
        dest: &Path,
    ) -> Result<u64, BootImageError> {
        let mut src = File::open(&self.path)?;
        src.seek(SeekFrom::Start(offset))?;

        let mut out = File::create(dest)?;
        let got = io::copy(&mut io::Read::take(&mut src, size), &mut out)?;
        out.flush()?;

        if got != size {
            drop(out);
            let _ = fs::remove_file(dest);
            return Err(BootImageError::Truncated {
                what,
                offset,
                expected: size,
                got,
            });
        }
        tracing::debug!(
            "extracted {} ({} bytes at {:#x}) to {}",
            what,
            size,
            offset,
            dest.display()
        );
        Ok(got)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Build a boot image with the given payloads and page size.
    pub(crate) fn build_image(kernel: &[u8], ramdisk: &[u8], page: u32, cmdline: &str) -> Vec<u8> {
        let mut img = Vec::new();
        img.extend_from_slice(BOOT_MAGIC);
        for word in [
            kernel.len() as u32,
            0x1000_8000,
            ramdisk.len() as u32,
            0x1100_0000,
            0,
            0x10f0_0000,
            0x1000_0100,
            page,
            0,
            0,
        ] {
            img.extend_from_slice(&word.to_le_bytes());
        }
        let mut name = [0u8; 16];
        name[..4].copy_from_slice(b"grou");
        img.extend_from_slice(&name);
        let mut cmd = [0u8; 512];
        cmd[..cmdline.len()].copy_from_slice(cmdline.as_bytes());
        img.extend_from_slice(&cmd);
        img.extend_from_slice(&[0u8; 32]);
        assert_eq!(img.len() as u64, BootImageHeader::SIZE);

        let page = page as usize;
        img.resize(page, 0);
        img.extend_from_slice(kernel);
        img.resize(page + kernel.len().div_ceil(page) * page, 0);
        img.extend_from_slice(ramdisk);
        img
    }

    fn write(tmp: &TempDir, bytes: &[u8]) -> PathBuf {
        let path = tmp.path().join("boot.img");
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_header_fields() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, &build_image(b"KERNEL", b"RD", 2048, "console=ttyS0"));

        let img = BootImage::open(&path).unwrap();
        let hdr = img.header();
        assert_eq!(hdr.kernel_size, 6);
        assert_eq!(hdr.ramdisk_size, 2);
        assert_eq!(hdr.page_size, 2048);
        assert_eq!(hdr.cmdline(), "console=ttyS0");
        assert_eq!(hdr.board_name(), "grou");
    }

    #[test]
    fn test_offsets() {
        let tmp = TempDir::new().unwrap();
        let kernel = vec![0xAB; 4097];
        let path = write(&tmp, &build_image(&kernel, b"ramdisk", 4096, ""));

        let hdr = BootImage::open(&path).unwrap().header().clone();
        assert_eq!(hdr.kernel_offset(), 4096);
        assert_eq!(hdr.ramdisk_offset(), 4096 + 2 * 4096);
    }

    #[test]
    fn test_exact_page_multiple_kernel() {
        let tmp = TempDir::new().unwrap();
        let kernel = vec![0x11; 2048];
        let path = write(&tmp, &build_image(&kernel, b"rd", 2048, ""));

        let img = BootImage::open(&path).unwrap();
        assert_eq!(img.header().ramdisk_offset(), 4096);
        let rd = tmp.path().join("initrd.img");
        img.extract_ramdisk(&rd).unwrap();
        assert_eq!(fs::read(&rd).unwrap(), b"rd");
    }

    #[test]
    fn test_bad_magic() {
        let tmp = TempDir::new().unwrap();
        let mut bytes = build_image(b"K", b"R", 2048, "");
        bytes[0] = b'X';
        let path = write(&tmp, &bytes);
        assert!(matches!(
            BootImage::open(&path),
            Err(BootImageError::BadMagic)
        ));
    }

    #[test]
    fn test_zero_page_size() {
        let tmp = TempDir::new().unwrap();
        let mut bytes = build_image(b"K", b"R", 2048, "");
        bytes[36..40].copy_from_slice(&0u32.to_le_bytes());
        let path = write(&tmp, &bytes[..608]);
        assert!(matches!(
            BootImage::open(&path),
            Err(BootImageError::InvalidPageSize(0))
        ));
    }

    #[test]
    fn test_truncated_header() {
        let tmp = TempDir::new().unwrap();
        let bytes = build_image(b"K", b"R", 2048, "");
        let path = write(&tmp, &bytes[..100]);
        assert!(matches!(BootImage::open(&path), Err(BootImageError::Io(_))));
    }

    #[test]
    fn test_truncated_ramdisk_fails_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let bytes = build_image(b"KERNEL", &[0x55; 100], 2048, "");
        let path = write(&tmp, &bytes[..bytes.len() - 40]);

        let img = BootImage::open(&path).unwrap();
        img.extract_kernel(&tmp.path().join("zImage")).unwrap();

        let rd = tmp.path().join("initrd.img");
        match img.extract_ramdisk(&rd) {
            Err(BootImageError::Truncated { expected, got, .. }) => {
                assert_eq!(expected, 100);
                assert_eq!(got, 60);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
        assert!(!rd.exists());
    }
}
