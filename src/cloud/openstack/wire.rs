//! OpenStack wire types
//!
//! Request and response bodies for the compute, volume and network APIs.
//! Only the fields the driver reads are modelled; everything else is
//! ignored on decode.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Compute
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireServer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    /// Network name -> ports on that network
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<WireAddress>>,
    #[serde(default)]
    pub security_groups: Vec<NameRef>,
    #[serde(rename = "OS-EXT-AZ:availability_zone", default)]
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireAddress {
    pub addr: String,
    #[serde(rename = "OS-EXT-IPS:type", default)]
    pub ip_type: Option<String>,
    #[serde(rename = "OS-EXT-IPS-MAC:mac_addr", default)]
    pub mac_addr: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRef {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ServerEnvelope {
    pub server: WireServer,
}

#[derive(Debug, Deserialize)]
pub struct ServerList {
    #[serde(default)]
    pub servers: Vec<WireServer>,
}

/// `server` in a boot response; some deployments return a one-element list
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CreatedServer {
    One(IdOnly),
    Many(Vec<IdOnly>),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdOnly {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatedServerEnvelope {
    pub server: CreatedServer,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WireAvailabilityZone {
    #[serde(rename = "zoneName")]
    pub zone_name: String,
    #[serde(rename = "zoneState")]
    pub zone_state: ZoneState,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZoneState {
    pub available: bool,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityZoneList {
    #[serde(rename = "availabilityZoneInfo", default)]
    pub zones: Vec<WireAvailabilityZone>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WireFlavor {
    pub id: String,
    pub name: String,
    pub vcpus: i64,
    pub ram: i64,
}

#[derive(Debug, Deserialize)]
pub struct FlavorList {
    #[serde(default)]
    pub flavors: Vec<WireFlavor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WireKeypair {
    pub keypair: NameRef,
}

#[derive(Debug, Deserialize)]
pub struct KeypairList {
    #[serde(default)]
    pub keypairs: Vec<WireKeypair>,
}

/// Network as listed by the compute service when there is no network service
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WireLegacyNetwork {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub cidr: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyNetworkList {
    #[serde(default)]
    pub networks: Vec<WireLegacyNetwork>,
}

/// One dimension of the compute quota detail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct QuotaDetail {
    pub limit: i64,
    #[serde(default)]
    pub reserved: i64,
    #[serde(default)]
    pub in_use: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ComputeQuotaSet {
    pub cores: QuotaDetail,
    pub ram: QuotaDetail,
    pub instances: QuotaDetail,
    #[serde(default)]
    pub fixed_ips: Option<QuotaDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ComputeQuotaEnvelope {
    pub quota_set: ComputeQuotaSet,
}

#[derive(Debug, Serialize)]
pub struct AttachRequest<'a> {
    #[serde(rename = "volumeAttachment")]
    pub volume_attachment: VolumeIdRef<'a>,
}

#[derive(Debug, Serialize)]
pub struct VolumeIdRef<'a> {
    #[serde(rename = "volumeId")]
    pub volume_id: &'a str,
}

/// Boot-from-volume request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateServerRequest {
    pub server: ServerSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSpec {
    pub name: String,
    #[serde(rename = "flavorRef")]
    pub flavor_ref: String,
    pub networks: Vec<ServerNetwork>,
    pub security_groups: Vec<NameRef>,
    pub block_device_mapping_v2: Vec<BlockDeviceMapping>,
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerNetwork {
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockDeviceMapping {
    pub source_type: String,
    pub boot_index: i32,
    pub uuid: String,
    pub volume_size: u64,
    pub destination_type: String,
    pub delete_on_termination: bool,
}

impl BlockDeviceMapping {
    /// Mapping for an existing volume at `boot_index`
    pub fn volume(uuid: &str, size: u64, boot_index: i32, delete_on_termination: bool) -> Self {
        Self {
            source_type: "volume".to_string(),
            boot_index,
            uuid: uuid.to_string(),
            volume_size: size,
            destination_type: "volume".to_string(),
            delete_on_termination,
        }
    }
}

// =============================================================================
// Volume
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireVolume {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub volume_type: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub bootable: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VolumeEnvelope {
    pub volume: WireVolume,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSnapshot {
    pub id: String,
    #[serde(default, alias = "displayName")]
    pub name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, alias = "volumeId")]
    pub volume_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotEnvelope {
    pub snapshot: WireSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WireVolumeType {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VolumeTypeList {
    #[serde(default)]
    pub volume_types: Vec<WireVolumeType>,
}

// =============================================================================
// Image
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WireImage {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageList {
    #[serde(default)]
    pub images: Vec<WireImage>,
}

/// One dimension of the volume quota with usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct VolumeQuotaDetail {
    pub limit: i64,
    #[serde(default)]
    pub reserved: i64,
    #[serde(default)]
    pub in_use: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct VolumeQuotaSet {
    pub volumes: VolumeQuotaDetail,
    pub gigabytes: VolumeQuotaDetail,
    pub snapshots: VolumeQuotaDetail,
}

#[derive(Debug, Deserialize)]
pub struct VolumeQuotaEnvelope {
    pub quota_set: VolumeQuotaSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateVolumeRequest {
    pub volume: VolumeSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeSpec {
    pub size: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateSnapshotRequest {
    pub snapshot: SnapshotSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSpec {
    pub name: String,
    pub volume_id: String,
    pub force: bool,
}

// =============================================================================
// Network
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WireNetwork {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "router:external", default)]
    pub external: bool,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl WireNetwork {
    /// Owned by `project_id` or shared with everyone
    pub fn visible_to(&self, project_id: &str) -> bool {
        self.project_id.as_deref() == Some(project_id)
            || self.tenant_id.as_deref() == Some(project_id)
            || self.shared
    }
}

#[derive(Debug, Deserialize)]
pub struct NetworkList {
    #[serde(default)]
    pub networks: Vec<WireNetwork>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WireSubnet {
    #[serde(default)]
    pub name: String,
    pub network_id: String,
    #[serde(default)]
    pub cidr: String,
    #[serde(default)]
    pub gateway_ip: Option<String>,
    #[serde(default)]
    pub allocation_pools: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SubnetList {
    #[serde(default)]
    pub subnets: Vec<WireSubnet>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WirePort {
    pub id: String,
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FixedIp {
    pub ip_address: String,
}

#[derive(Debug, Deserialize)]
pub struct PortList {
    #[serde(default)]
    pub ports: Vec<WirePort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WireSecurityGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl WireSecurityGroup {
    pub fn owned_by(&self, project_id: &str) -> bool {
        self.project_id.as_deref() == Some(project_id)
            || self.tenant_id.as_deref() == Some(project_id)
    }
}

#[derive(Debug, Deserialize)]
pub struct SecurityGroupList {
    #[serde(default)]
    pub security_groups: Vec<WireSecurityGroup>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct NetworkQuota {
    pub port: i64,
}

#[derive(Debug, Deserialize)]
pub struct NetworkQuotaEnvelope {
    pub quota: NetworkQuota,
}
