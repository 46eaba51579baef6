//! Domain Ports - Core trait definitions for migration scouting
//!
//! These traits define the boundaries between the provisioning/collection
//! workflows and the external systems they drive. Cloud backends implement
//! [`CloudDriver`]; per-OS fact gatherers implement [`HostCollector`].

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

// =============================================================================
// Cloud Types
// =============================================================================

/// Cloud backends supported by the driver factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CloudType {
    #[serde(alias = "openstack", alias = "OPENSTACK")]
    OpenStack,
}

impl std::fmt::Display for CloudType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudType::OpenStack => write!(f, "OpenStack"),
        }
    }
}

/// Authentication parameters for a cloud backend.
///
/// Built once from configuration and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudCredential {
    pub cloud_type: CloudType,
    /// Identity endpoint, e.g. `http://keystone:5000/v3`
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub project_name: String,
    #[serde(default = "default_domain")]
    pub domain_name: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Instance id of the local host inside the cloud
    #[serde(default)]
    pub node_id: Option<String>,
    /// Availability zone passed when creating volumes
    #[serde(default)]
    pub volume_availability_zone: Option<String>,
}

fn default_domain() -> String {
    "default".to_string()
}

fn default_region() -> String {
    "RegionOne".to_string()
}

/// Non-secret view of an authenticated session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub project_id: String,
    /// Service type -> base URL
    pub endpoints: BTreeMap<String, String>,
    pub advanced_networking: bool,
}

/// The local host as seen by the cloud
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub node_mac_addr: String,
    pub external_ip: Option<String>,
}

// =============================================================================
// Storage Resources
// =============================================================================

/// Block volume as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub status: String,
    /// Size in GB
    pub size: u64,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Volume attached to the local node with its device path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedVolume {
    #[serde(flatten)]
    pub volume: Volume,
    pub path: PathBuf,
}

/// Where an attached volume shows up on the local node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumePath {
    pub id: String,
    pub path: PathBuf,
}

/// Point-in-time snapshot of a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub status: String,
    pub size: u64,
    pub volume_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeType {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Capacity summary used by storage setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudQuota {
    /// Total capacity in GB, -1 when unlimited
    pub total_capacity: i64,
    pub volumes_max_num: u32,
}

impl Default for CloudQuota {
    fn default() -> Self {
        Self {
            total_capacity: QuotaUsage::UNLIMITED,
            volumes_max_num: 20,
        }
    }
}

// =============================================================================
// Compute Resources
// =============================================================================

/// Server instance as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub state: String,
    pub public_ips: Vec<String>,
    pub private_ips: Vec<String>,
    /// Network name -> addresses on that network
    pub networks: BTreeMap<String, Vec<String>>,
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityZone {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    pub id: String,
    pub name: String,
    pub vcpus: i64,
    /// RAM in MB
    pub ram: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Fixed,
    Floating,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub name: String,
    pub cidr: String,
    pub gateway: Option<String>,
    /// JSON encoded allocation pools, when the backend exposes them
    pub allocation_pools: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub network_type: NetworkType,
    pub subnets: Vec<Subnet>,
}

// =============================================================================
// Quota
// =============================================================================

/// Used/total pair for one quota dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub used: i64,
    pub total: i64,
}

impl QuotaUsage {
    /// Sentinel total meaning "no limit"
    pub const UNLIMITED: i64 = -1;

    pub fn new(used: i64, total: i64) -> Self {
        Self { used, total }
    }

    pub fn unlimited() -> Self {
        Self::new(0, Self::UNLIMITED)
    }

    /// Build from a backend `limit`/`reserved`/`in_use` triple
    pub fn from_limit(limit: i64, reserved: i64, in_use: i64) -> Self {
        let total = if limit == Self::UNLIMITED {
            Self::UNLIMITED
        } else {
            limit.saturating_sub(reserved)
        };
        Self::new(in_use, total)
    }

    pub fn is_unlimited(&self) -> bool {
        self.total == Self::UNLIMITED
    }

    /// Fail if `requested` more units do not fit.
    ///
    /// Unlimited dimensions never fail, whatever `used` says.
    pub fn ensure_room(&self, resource: &str, requested: i64) -> Result<()> {
        if self.is_unlimited() {
            return Ok(());
        }
        if requested.saturating_add(self.used) > self.total {
            return Err(Error::QuotaExceeded {
                resource: resource.to_string(),
                used: self.used,
                total: self.total,
                needed: requested,
            });
        }
        Ok(())
    }
}

/// Read-only view of the project quota across services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub cores: QuotaUsage,
    pub ram: QuotaUsage,
    pub instances: QuotaUsage,
    pub ports: QuotaUsage,
    pub volumes: QuotaUsage,
    pub gigabytes: QuotaUsage,
    pub snapshots: QuotaUsage,
}

impl Default for QuotaSnapshot {
    fn default() -> Self {
        Self {
            cores: QuotaUsage::unlimited(),
            ram: QuotaUsage::unlimited(),
            instances: QuotaUsage::unlimited(),
            ports: QuotaUsage::unlimited(),
            volumes: QuotaUsage::unlimited(),
            gigabytes: QuotaUsage::unlimited(),
            snapshots: QuotaUsage::unlimited(),
        }
    }
}

/// Aggregated description of the target cloud environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudInfo {
    pub availability_zones: Vec<AvailabilityZone>,
    pub flavors: Vec<Flavor>,
    pub keypairs: Vec<Keypair>,
    pub networks: Vec<Network>,
    pub security_groups: Vec<SecurityGroup>,
    pub quota: QuotaSnapshot,
}

// =============================================================================
// Migration Requests
// =============================================================================

/// Network selection for a new instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSelection {
    pub id: String,
    /// Fixed IP to request on this network
    #[serde(default)]
    pub addr: Option<String>,
}

/// Placement parameters for booting a migrated instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementParams {
    /// Flavor id
    pub flavor: String,
    pub network: NetworkSelection,
    #[serde(default)]
    pub availability_zone: Option<String>,
    /// Keypair name
    #[serde(default)]
    pub keypair: Option<String>,
    /// Security group ids
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// Defaults to `RECOVER:<unix timestamp>`
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default = "default_true")]
    pub delete_on_termination: bool,
}

fn default_true() -> bool {
    true
}

impl PlacementParams {
    pub fn new(flavor: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            flavor: flavor.into(),
            network: NetworkSelection {
                id: network_id.into(),
                addr: None,
            },
            availability_zone: None,
            keypair: None,
            security_groups: Vec::new(),
            instance_name: None,
            delete_on_termination: true,
        }
    }
}

/// Cloud snapshot that will be restored into a volume of the new instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub cloud_snap_id: String,
    #[serde(default)]
    pub index: Option<u32>,
}

/// Facts about the migration source carried into instance metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceExtra {
    #[serde(default)]
    pub os_type: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub os_bit: String,
    #[serde(default)]
    pub boot_type: String,
}

/// A host being migrated: where it goes and what it is restored from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationInstance {
    pub id: String,
    pub placement: PlacementParams,
    #[serde(default)]
    pub snapshots: Vec<SnapshotRef>,
    #[serde(default)]
    pub source_extra: SourceExtra,
}

/// Placement parameters resolved against the cloud's current view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPlacement {
    pub availability_zone: Option<AvailabilityZone>,
    pub keypair: Option<Keypair>,
    pub flavor: Flavor,
    pub network: NetworkSelection,
    pub security_groups: Vec<SecurityGroup>,
}

/// Outcome of the advisory duplicate-IP probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpAddrStatus {
    /// No port on the network holds the address
    Available,
    /// A port on the network already holds the address
    InUse,
    /// No address requested, or the probe itself failed
    Unknown,
}

// =============================================================================
// Cloud Driver Port
// =============================================================================

/// Capability set every cloud backend exposes to the provisioning workflow.
///
/// Create/delete operations block the calling task until the backend
/// reaches a terminal state. Read operations return `Ok(None)` when the
/// resource does not exist.
#[async_trait]
pub trait CloudDriver: Send + Sync {
    /// Backend kind
    fn cloud_type(&self) -> CloudType;

    /// Establish (or refresh) the session for this driver's credential
    async fn authenticate(&self) -> Result<SessionInfo>;

    /// Find the local host among the cloud's instances by MAC address
    async fn check_register(&self) -> Result<NodeInfo>;

    /// Smoke-test the API surface the workflow needs
    async fn check_cloud_apis(&self) -> Result<()>;

    /// Smoke-test that storage quota headroom exists
    async fn check_cloud_quota(&self) -> Result<()>;

    /// Run the environment smoke tests in order
    async fn check_cloud_env(&self) -> Result<()> {
        tracing::info!("Checking cloud APIs");
        self.check_cloud_apis().await?;
        tracing::info!("Checking cloud quota");
        self.check_cloud_quota().await?;
        tracing::info!("Cloud environment check passed");
        Ok(())
    }

    /// Aggregate descriptive and quota information, all or nothing
    async fn get_cloud_info(&self) -> Result<CloudInfo>;

    /// Storage capacity summary
    async fn get_cloud_quota(&self) -> Result<CloudQuota> {
        Ok(CloudQuota::default())
    }

    /// Volume status meaning "attached"
    fn volume_attached_status(&self) -> &'static str;

    async fn get_volume(&self, volume_id: &str) -> Result<Option<Volume>>;

    async fn create_volume(&self, size: u64, name: &str, volume_type: Option<&str>) -> Result<Volume>;

    /// Delete a volume; a missing volume is a no-op
    async fn delete_volume(&self, volume_id: &str) -> Result<()>;

    async fn get_volume_snapshot(&self, volume_id: &str, snapshot_id: &str) -> Result<Option<Snapshot>>;

    async fn create_volume_snapshot(&self, volume_id: &str, name: &str) -> Result<Snapshot>;

    /// Delete a snapshot; a missing snapshot is a no-op
    async fn delete_volume_snapshot(&self, volume_id: &str, snapshot_id: &str) -> Result<()>;

    async fn create_volume_from_snapshot(&self, snapshot_id: &str, name: Option<&str>) -> Result<Volume>;

    /// Attach to the local node and wait for the device node to appear
    async fn attach_volume_to_local(&self, volume_id: &str) -> Result<AttachedVolume>;

    async fn detach_volume(&self, volume_id: &str) -> Result<Volume>;

    /// Expected device path of an attached volume on the local node
    fn volume_path_in_node(&self, volume_id: &str) -> VolumePath;

    /// Volume types; empty when they cannot be listed
    async fn get_volume_types(&self) -> Vec<VolumeType> {
        Vec::new()
    }

    /// Resolve placement names/ids against the cloud's current view
    async fn check_instance_params(&self, instance: &MigrationInstance) -> Result<ResolvedPlacement>;

    /// Check quota headroom for booting `instance`
    async fn check_quota(&self, instance: &MigrationInstance, resolved: &ResolvedPlacement) -> Result<()>;

    /// Advisory probe for a requested fixed IP already in use
    async fn check_ip_addr(&self, instance: &MigrationInstance) -> IpAddrStatus;

    async fn get_instance(&self, instance_id: &str) -> Result<Option<Instance>>;

    /// Boot from volumes; a failed boot is cleaned up before returning
    async fn create_instance(
        &self,
        boot_volume: &Volume,
        data_volumes: &[Volume],
        placement: &PlacementParams,
        source: &SourceExtra,
    ) -> Result<Instance>;

    /// Delete an instance; a missing instance is a no-op
    async fn delete_instance(&self, instance_id: &str) -> Result<()>;
}

// =============================================================================
// Host Collector Port
// =============================================================================

/// One target host handed to a collector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    pub ip: String,
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub ssh_port: Option<u16>,
    pub key_path: Option<PathBuf>,
    /// Uppercased OS tag, e.g. `LINUX`
    pub os_type: String,
    pub tcp_ports: String,
    /// Collection directory the artifact is written under
    pub output_path: PathBuf,
}

impl HostTarget {
    /// Tag used in logs and summaries, e.g. `[LINUX]10.0.0.5`
    pub fn tag(&self) -> String {
        format!("[{}]{}", self.os_type, self.ip)
    }
}

/// Human readable collection summary at two verbosity tiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub info: Vec<String>,
    pub debug: Vec<String>,
}

/// Port for per-OS fact collection
#[async_trait]
pub trait HostCollector: Send + Sync {
    /// Collect facts and write the host artifact
    async fn collect(&mut self) -> Result<()>;

    /// Summary of the last collection, if the collector has one
    fn summary(&self) -> Option<CollectionSummary> {
        None
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type CloudDriverRef = Arc<dyn CloudDriver>;
