//! Parser for `blkid` output.
//!
//! Each line is one record:
//!
//! ```text
//! line   := devpath ':' { ws field }
//! field  := KEY '="' VALUE '"'
//! ```
//!
//! Lines that do not follow the grammar are skipped, never partially used.

/// One block device as reported by blkid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlkidRecord {
    /// Full device path, e.g. `/dev/block/sda1`.
    pub dev_path: String,
    /// Last path segment, e.g. `sda1`.
    pub name: String,
    pub uuid: Option<String>,
    pub fs_type: Option<String>,
    pub label: Option<String>,
}

impl BlkidRecord {
    /// SCSI-style disks (`/dev/block/sdX`) are the USB mass-storage devices.
    pub fn is_removable(&self) -> bool {
        self.dev_path.contains("/sd")
    }
}

/// Parse a single line. Returns `None` for malformed lines.
pub fn parse_line(line: &str) -> Option<BlkidRecord> {
    let line = line.trim();
    let (dev_path, rest) = line.split_once(':')?;
    let dev_path = dev_path.trim();
    if dev_path.is_empty() || dev_path.contains(char::is_whitespace) {
        return None;
    }
    let name = dev_path.rsplit('/').next().filter(|n| !n.is_empty())?;

    let mut record = BlkidRecord {
        dev_path: dev_path.to_string(),
        name: name.to_string(),
        uuid: None,
        fs_type: None,
        label: None,
    };

    let mut rest = rest.trim_start();
    while !rest.is_empty() {
        let (key, after) = rest.split_once("=\"")?;
        if key.is_empty() || key.contains(char::is_whitespace) {
            return None;
        }
        let (value, after) = after.split_once('"')?;
        let value = Some(value.to_string());
        match key {
            "UUID" => record.uuid = value,
            "TYPE" => record.fs_type = value,
            "LABEL" => record.label = value,
            _ => {}
        }
        rest = after.trim_start();
    }

    Some(record)
}

/// Parse full blkid output, skipping malformed lines.
pub fn parse_output(output: &str) -> Vec<BlkidRecord> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let record = parse_line(line);
            if record.is_none() {
                tracing::debug!("skipping malformed blkid line: {}", line);
            }
            record
        })
        .collect()
}
