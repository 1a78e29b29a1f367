//! ROM records and storage-layout classification.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use crate::partition::Partition;

/// Name of the ROM that represents the device's original system.
pub const INTERNAL_ROM_NAME: &str = "Internal";
/// Longest accepted ROM directory name, in bytes.
pub const MAX_ROM_NAME_LEN: usize = 26;
/// Marker file present in the ROM folder while the ROM occupies the real root.
pub const IN_ROOT_MARKER: &str = "is_in_root";
pub const BOOT_IMAGE: &str = "boot.img";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RomType {
    Default,
    AndroidInternal,
    AndroidUsbDir,
    AndroidUsbImg,
    UbuntuInternal,
    UbuntuUsbDir,
    UbuntuUsbImg,
    Unknown,
}

impl RomType {
    pub fn is_android(self) -> bool {
        matches!(
            self,
            RomType::AndroidInternal | RomType::AndroidUsbDir | RomType::AndroidUsbImg
        )
    }

    pub fn is_ubuntu(self) -> bool {
        matches!(
            self,
            RomType::UbuntuInternal | RomType::UbuntuUsbDir | RomType::UbuntuUsbImg
        )
    }

    pub fn is_usb(self) -> bool {
        matches!(
            self,
            RomType::AndroidUsbDir
                | RomType::AndroidUsbImg
                | RomType::UbuntuUsbDir
                | RomType::UbuntuUsbImg
        )
    }
}

impl fmt::Display for RomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RomType::Default => "default",
            RomType::AndroidInternal => "android-internal",
            RomType::AndroidUsbDir => "android-usb-dir",
            RomType::AndroidUsbImg => "android-usb-img",
            RomType::UbuntuInternal => "ubuntu-internal",
            RomType::UbuntuUsbDir => "ubuntu-usb-dir",
            RomType::UbuntuUsbImg => "ubuntu-usb-img",
            RomType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Required sibling paths per layout, tested in this order.
const LAYOUTS: [(&[&str], RomType, RomType); 4] = [
    (
        &["system", "data", "cache"],
        RomType::AndroidInternal,
        RomType::AndroidUsbDir,
    ),
    (&["root"], RomType::UbuntuInternal, RomType::UbuntuUsbDir),
    (
        &["system.img", "data.img", "cache.img"],
        RomType::Unknown,
        RomType::AndroidUsbImg,
    ),
    (&["root.img"], RomType::Unknown, RomType::UbuntuUsbImg),
];

/// Classify a ROM folder by which layout files exist under it.
///
/// Depends only on the names present under `base_path`, so repeated calls
/// over an unchanged tree agree. Disk-image layouts are only supported on
/// removable media; locally they classify as `Unknown`.
pub fn classify(name: &str, base_path: &Path, on_partition: bool) -> RomType {
    if !on_partition && name == INTERNAL_ROM_NAME {
        return RomType::Default;
    }

    for (required, internal, usb) in LAYOUTS {
        if required.iter().all(|rel| base_path.join(rel).exists()) {
            return if on_partition { usb } else { internal };
        }
    }
    RomType::Unknown
}

/// Process-local ROM identity. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RomId(u32);

impl RomId {
    pub fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        RomId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

/// One installed ROM.
#[derive(Debug, Clone)]
pub struct Rom {
    pub id: RomId,
    pub name: String,
    pub base_path: PathBuf,
    pub rom_type: RomType,
    pub is_in_root: bool,
    pub has_boot_image: bool,
    /// Back-reference to the removable partition holding this ROM.
    partition: Option<Weak<Partition>>,
}

impl Rom {
    /// Probe a ROM folder on disk and build its record.
    pub fn probe(name: &str, base_path: &Path, partition: Option<&Arc<Partition>>) -> Self {
        let rom_type = classify(name, base_path, partition.is_some());
        Self {
            id: RomId::next(),
            name: name.to_string(),
            base_path: base_path.to_path_buf(),
            rom_type,
            is_in_root: base_path.join(IN_ROOT_MARKER).exists(),
            has_boot_image: base_path.join(BOOT_IMAGE).exists(),
            partition: partition.map(Arc::downgrade),
        }
    }

    pub fn is_removable(&self) -> bool {
        self.partition.is_some()
    }

    /// The owning partition, if the ROM lives on one that is still present.
    pub fn partition(&self) -> Option<Arc<Partition>> {
        self.partition.as_ref().and_then(Weak::upgrade)
    }

    /// True for a removable ROM whose partition has gone away.
    pub fn is_orphaned(&self) -> bool {
        self.partition.is_some() && self.partition().is_none()
    }

    pub fn boot_image_path(&self) -> PathBuf {
        self.base_path.join(BOOT_IMAGE)
    }

    pub fn in_root_marker(&self) -> PathBuf {
        self.base_path.join(IN_ROOT_MARKER)
    }

    /// Folder holding the ROM's root tree while it is not in the real root.
    pub fn root_folder(&self) -> PathBuf {
        self.base_path.join("root")
    }

    pub fn summary(&self) -> RomSummary {
        RomSummary {
            id: self.id.value(),
            name: self.name.clone(),
            base_path: self.base_path.display().to_string(),
            rom_type: self.rom_type,
            is_in_root: self.is_in_root,
            has_boot_image: self.has_boot_image,
            partition: self.partition().map(|p| p.name.clone()),
        }
    }
}

/// Serializable view of a [`Rom`] for listings.
#[derive(Debug, Clone, Serialize)]
pub struct RomSummary {
    pub id: u32,
    pub name: String,
    pub base_path: String,
    pub rom_type: RomType,
    pub is_in_root: bool,
    pub has_boot_image: bool,
    pub partition: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make(base: &Path, entries: &[&str]) {
        fs::create_dir_all(base).unwrap();
        for entry in entries {
            if entry.ends_with(".img") {
                fs::write(base.join(entry), b"").unwrap();
            } else {
                fs::create_dir_all(base.join(entry)).unwrap();
            }
        }
    }

    #[test]
    fn test_classify_layouts() {
        let tmp = TempDir::new().unwrap();
        let cases: [(&str, &[&str], RomType, RomType); 5] = [
            (
                "android",
                &["system", "data", "cache"],
                RomType::AndroidInternal,
                RomType::AndroidUsbDir,
            ),
            ("ubuntu", &["root"], RomType::UbuntuInternal, RomType::UbuntuUsbDir),
            (
                "android_img",
                &["system.img", "data.img", "cache.img"],
                RomType::Unknown,
                RomType::AndroidUsbImg,
            ),
            ("ubuntu_img", &["root.img"], RomType::Unknown, RomType::UbuntuUsbImg),
            ("empty", &[], RomType::Unknown, RomType::Unknown),
        ];

        for (name, entries, internal, usb) in cases {
            let base = tmp.path().join(name);
            make(&base, entries);
            assert_eq!(classify(name, &base, false), internal, "{}", name);
            assert_eq!(classify(name, &base, true), usb, "{}", name);
            // Same tree, same answer.
            assert_eq!(classify(name, &base, false), internal, "{}", name);
        }
    }

    #[test]
    fn test_android_needs_all_three_dirs() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("partial");
        make(&base, &["system", "data"]);
        assert_eq!(classify("partial", &base, false), RomType::Unknown);
    }

    #[test]
    fn test_android_dir_wins_over_root() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("both");
        make(&base, &["system", "data", "cache", "root"]);
        assert_eq!(classify("both", &base, false), RomType::AndroidInternal);
    }

    #[test]
    fn test_internal_is_always_default_locally() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join(INTERNAL_ROM_NAME);
        make(&base, &["root"]);
        assert_eq!(classify(INTERNAL_ROM_NAME, &base, false), RomType::Default);
        assert_eq!(classify(INTERNAL_ROM_NAME, &base, true), RomType::UbuntuUsbDir);
    }

    #[test]
    fn test_probe_flags_and_ids() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("CM11");
        make(&base, &["system", "data", "cache"]);
        fs::write(base.join(BOOT_IMAGE), b"ANDROID!").unwrap();
        fs::write(base.join(IN_ROOT_MARKER), b"").unwrap();

        let a = Rom::probe("CM11", &base, None);
        let b = Rom::probe("CM11", &base, None);
        assert!(a.has_boot_image);
        assert!(a.is_in_root);
        assert!(!a.is_removable());
        assert!(b.id > a.id);
    }

    #[test]
    fn test_orphaned_when_partition_dropped() {
        let tmp = TempDir::new().unwrap();
        let part = Arc::new(Partition::new("sda1", None, "ext4", tmp.path().to_path_buf()));
        let rom = Rom::probe("Ubuntu", tmp.path(), Some(&part));
        assert!(rom.partition().is_some());
        assert!(!rom.is_orphaned());

        drop(part);
        assert!(rom.is_orphaned());
    }
}
