//! Local node inspection
//!
//! The driver runs on an instance inside the target cloud. This module
//! finds that instance's MAC addresses from sysfs and watches `/dev` for
//! the device nodes of volumes attached to it.

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Characters of the volume id the hypervisor puts in the disk serial
const VIRTIO_SERIAL_LEN: usize = 20;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LocalNodeConfig {
    /// Path to sysfs (for testing)
    pub sysfs_path: PathBuf,
    /// Path to the device tree (for testing)
    pub dev_path: PathBuf,
    /// Use this MAC instead of scanning interfaces
    pub mac_override: Option<String>,
}

impl Default for LocalNodeConfig {
    fn default() -> Self {
        Self {
            sysfs_path: PathBuf::from("/sys"),
            dev_path: PathBuf::from("/dev"),
            mac_override: None,
        }
    }
}

/// Bounds for attaching a volume to the local node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachConfig {
    /// Whole attach attempts before giving up
    pub attempts: u32,
    /// How long to wait for the device node per attempt
    pub device_timeout: Duration,
    pub device_interval: Duration,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            attempts: 4,
            device_timeout: Duration::from_secs(30),
            device_interval: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Local Node
// =============================================================================

#[derive(Debug, Clone)]
pub struct LocalNode {
    config: LocalNodeConfig,
}

impl LocalNode {
    pub fn new(config: LocalNodeConfig) -> Self {
        Self { config }
    }

    /// MAC addresses of the local interfaces, lowercased.
    ///
    /// Loopback and all-zero addresses are skipped.
    pub fn mac_addresses(&self) -> Result<Vec<String>> {
        if let Some(mac) = &self.config.mac_override {
            return Ok(vec![mac.to_lowercase()]);
        }

        let net_path = self.config.sysfs_path.join("class/net");
        if !net_path.exists() {
            warn!("No network sysfs path found at {:?}", net_path);
            return Ok(Vec::new());
        }

        let mut macs = Vec::new();
        let mut entries: Vec<_> = fs::read_dir(&net_path)?.flatten().collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "lo" {
                continue;
            }
            let Some(mac) = read_sysfs_string(&entry.path().join("address")) else {
                continue;
            };
            let mac = mac.to_lowercase();
            if mac.is_empty() || mac == "00:00:00:00:00:00" {
                continue;
            }
            debug!("Interface {} has MAC {}", name, mac);
            macs.push(mac);
        }

        info!("Found {} local MAC addresses", macs.len());
        Ok(macs)
    }

    /// Device node an attached volume appears as
    pub fn device_path(&self, volume_id: &str) -> PathBuf {
        let serial: String = volume_id.chars().take(VIRTIO_SERIAL_LEN).collect();
        self.config
            .dev_path
            .join("disk/by-id")
            .join(format!("virtio-{}", serial))
    }

    /// Wait for `path` to exist; `false` once the budget is spent
    pub async fn wait_for_device(&self, path: &Path, config: &AttachConfig) -> bool {
        let deadline = Instant::now() + config.device_timeout;
        loop {
            if path.exists() {
                info!("Device {} is present", path.display());
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!("Device {} did not appear in {:?}", path.display(), config.device_timeout);
                return false;
            }
            debug!("Waiting for device {}", path.display());
            tokio::time::sleep(config.device_interval.min(deadline - now)).await;
        }
    }
}

fn read_sysfs_string(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
