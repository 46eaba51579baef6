//! Reachability collector
//!
//! Baseline collector for every built-in OS family: opens a TCP connection
//! to the host's management port and records the result. Richer collectors
//! (SSH facts, WMI, vSphere inventory) replace it through the registry.

use super::artifact::{CollectionStatus, HostArtifact};
use crate::domain::ports::{CollectionSummary, HostCollector, HostTarget};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_WINRM_PORT: u16 = 5985;
pub const DEFAULT_VMWARE_PORT: u16 = 443;

/// Management port for an OS tag when the row gives none
pub fn default_port(os_type: &str) -> u16 {
    match os_type.to_uppercase().as_str() {
        "WINDOWS" => DEFAULT_WINRM_PORT,
        "VMWARE" => DEFAULT_VMWARE_PORT,
        _ => DEFAULT_SSH_PORT,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Connect timeout per host
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

// =============================================================================
// Collector
// =============================================================================

pub struct ReachabilityCollector {
    target: HostTarget,
    config: ProbeConfig,
    summary: Option<CollectionSummary>,
}

impl ReachabilityCollector {
    pub fn new(target: HostTarget, config: ProbeConfig) -> Self {
        Self {
            target,
            config,
            summary: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.target
            .ssh_port
            .unwrap_or_else(|| default_port(&self.target.os_type))
    }

    fn address(&self) -> String {
        if self.target.ip.contains(':') {
            format!("[{}]:{}", self.target.ip, self.port())
        } else {
            format!("{}:{}", self.target.ip, self.port())
        }
    }

    /// `Ok` when the port accepted a connection, else the reason
    async fn probe(&self) -> std::result::Result<(), String> {
        match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(self.address())).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.config.connect_timeout)),
        }
    }
}

#[async_trait]
impl HostCollector for ReachabilityCollector {
    async fn collect(&mut self) -> Result<()> {
        let tag = self.target.tag();
        let port = self.port();
        info!("Probing {} on port {}", tag, port);

        let outcome = self.probe().await;
        let status = match outcome {
            Ok(()) => CollectionStatus::Success,
            Err(_) => CollectionStatus::Unreachable,
        };

        let mut artifact = HostArtifact::new(&self.target.os_type, &self.target.ip, status);
        artifact.tcp_ports = self.target.tcp_ports.clone();
        artifact.insert("hostname", self.target.hostname.as_str());
        artifact.insert("port", u64::from(port));
        artifact.insert("reachable", outcome.is_ok());
        if let Err(reason) = &outcome {
            artifact.insert("error", reason.as_str());
        }
        let path = artifact.save(&self.target.output_path)?;

        match outcome {
            Ok(()) => {
                self.summary = Some(CollectionSummary {
                    info: vec![format!("{} reachable on port {}", tag, port)],
                    debug: vec![format!("{} artifact: {}", tag, path.display())],
                });
                Ok(())
            }
            Err(reason) => {
                warn!("{} is unreachable on port {}: {}", tag, port, reason);
                Err(Error::CollectionFailed {
                    host: tag,
                    reason: format!("port {} unreachable: {}", port, reason),
                })
            }
        }
    }

    fn summary(&self) -> Option<CollectionSummary> {
        self.summary.clone()
    }
}
