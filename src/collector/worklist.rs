//! Host worklist
//!
//! The worklist is a CSV file with one row per host. It is read fully,
//! mutated in memory and rewritten to the same path after every processed
//! row. Rewrites go through a temp file in the same directory followed by
//! a rename, so a crash never leaves a half-written worklist.

use crate::domain::ports::HostTarget;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Marks a row for collection
pub const CHECK_STATUS_CHECK: &str = "CHECK";
pub const DO_STATUS_SUCCESS: &str = "success";
pub const DO_STATUS_FAILED: &str = "failed";

// =============================================================================
// Work Item
// =============================================================================

/// One row of the host worklist
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostWorkItem {
    pub hostname: String,
    pub ip: String,
    pub username: String,
    pub password: String,
    pub ssh_port: String,
    pub key_path: String,
    pub mac: String,
    pub vendor: String,
    pub check_status: String,
    #[serde(rename = "os")]
    pub os_type: String,
    pub version: String,
    pub tcp_ports: String,
    pub do_status: String,
}

impl HostWorkItem {
    /// Log tag, e.g. `[LINUX]10.0.0.5`
    pub fn tag(&self) -> String {
        format!("[{}]{}", self.os_type.to_uppercase(), self.ip)
    }

    /// Marked `CHECK` and not already collected, unless forced
    pub fn is_need_check(&self, force_check: bool) -> bool {
        debug!(
            "Host {} check status is {:?}, do status is {:?}, force check is {}",
            self.tag(),
            self.check_status,
            self.do_status,
            force_check
        );
        if !self.check_status.eq_ignore_ascii_case(CHECK_STATUS_CHECK) {
            return false;
        }
        force_check || !self.do_status.eq_ignore_ascii_case(DO_STATUS_SUCCESS)
    }

    /// Reason the row lacks credentials, if it does
    pub fn missing_credentials(&self) -> Option<&'static str> {
        if self.username.is_empty() {
            return Some("username is not given");
        }
        if self.password.is_empty() && self.key_path.is_empty() {
            return Some("password or key is not given");
        }
        None
    }

    /// Collector input for this row
    pub fn target(&self, output_path: &Path) -> Result<HostTarget> {
        let ssh_port = match self.ssh_port.trim() {
            "" => None,
            port => Some(port.parse::<u16>().map_err(|_| {
                Error::Validation(format!("Invalid ssh_port {:?} for host {}", port, self.ip))
            })?),
        };
        Ok(HostTarget {
            ip: self.ip.clone(),
            hostname: self.hostname.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            ssh_port,
            key_path: (!self.key_path.is_empty()).then(|| PathBuf::from(&self.key_path)),
            os_type: self.os_type.to_uppercase(),
            tcp_ports: self.tcp_ports.clone(),
            output_path: output_path.to_path_buf(),
        })
    }
}

/// Worklist columns that carry no credentials
#[derive(Debug, Serialize)]
struct ScanRow<'a> {
    hostname: &'a str,
    ip: &'a str,
    mac: &'a str,
    vendor: &'a str,
    os: &'a str,
    version: &'a str,
    tcp_ports: &'a str,
    check_status: &'a str,
    do_status: &'a str,
}

impl<'a> From<&'a HostWorkItem> for ScanRow<'a> {
    fn from(item: &'a HostWorkItem) -> Self {
        Self {
            hostname: &item.hostname,
            ip: &item.ip,
            mac: &item.mac,
            vendor: &item.vendor,
            os: &item.os_type,
            version: &item.version,
            tcp_ports: &item.tcp_ports,
            check_status: &item.check_status,
            do_status: &item.do_status,
        }
    }
}

// =============================================================================
// Worklist
// =============================================================================

/// Rows of a host file, bound to the path they are persisted to
#[derive(Debug, Clone)]
pub struct Worklist {
    path: PathBuf,
    pub items: Vec<HostWorkItem>,
}

impl Worklist {
    /// Read every row of `path`
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::Configuration(format!(
                "Host file {} does not exist",
                path.display()
            )));
        }

        // short rows leave the trailing columns empty
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(&path)?;
        let items = reader
            .deserialize()
            .collect::<std::result::Result<Vec<HostWorkItem>, _>>()?;

        info!("Found {} host(s) in {}", items.len(), path.display());
        Ok(Self { path, items })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Rewrite the whole file in place
    pub fn save(&self) -> Result<()> {
        write_atomic(&self.path, |writer| {
            for item in &self.items {
                writer.serialize(item)?;
            }
            Ok(())
        })?;
        debug!("Saved worklist to {}", self.path.display());
        Ok(())
    }

    /// Write the credential-free columns to `path`
    pub fn save_scan_report(&self, path: &Path) -> Result<()> {
        write_atomic(path, |writer| {
            for item in &self.items {
                writer.serialize(ScanRow::from(item))?;
            }
            Ok(())
        })?;
        info!("Saved scan report to {}", path.display());
        Ok(())
    }
}

/// Write CSV rows to a sibling temp file, then rename it over `path`
fn write_atomic<F>(path: &Path, write_rows: F) -> Result<()>
where
    F: FnOnce(&mut csv::Writer<&mut tempfile::NamedTempFile>) -> Result<()>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = csv::Writer::from_writer(&mut tmp);
        write_rows(&mut writer)?;
        writer.flush()?;
    }
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
