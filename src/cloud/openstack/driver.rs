//! OpenStack Cloud Driver
//!
//! Implements [`CloudDriver`] over the compute (Nova), volume (Cinder) and
//! network (Neutron) APIs:
//! - Volume and snapshot lifecycle with blocking state polls
//! - Attaching volumes to the local node and waiting for the device
//! - Boot-from-volume instance creation with cleanup on failure
//! - Cloud inventory and quota checks for migration planning

use super::client::{OpenStackApiRef, OpenStackClient};
use super::local::{AttachConfig, LocalNode, LocalNodeConfig};
use super::quota::{
    build_networks, build_quota, check_flavor, check_ports, check_volume_quota, legacy_networks,
    ComputeQuota, VolumeQuota,
};
use super::session::CatalogConfig;
use super::wait::{wait_for_state, PollConfig};
use super::wire::*;
use crate::cloud::http::HttpConfig;
use crate::domain::ports::*;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Longest volume or snapshot name sent to the backend
pub const NAME_MAX_LEN: usize = 127;

/// Characters kept from each part of a derived volume name
const DERIVED_NAME_PART_LEN: usize = 40;

const VOLUME_ATTACHED_STATUS: &str = "IN-USE";

// =============================================================================
// Configuration
// =============================================================================

/// Tuning for the OpenStack driver
#[derive(Debug, Clone, Default)]
pub struct OpenStackConfig {
    pub catalog: CatalogConfig,
    pub http: HttpConfig,
    pub poll: PollConfig,
    pub attach: AttachConfig,
    pub local: LocalNodeConfig,
}

// =============================================================================
// Driver
// =============================================================================

/// Cloud driver for OpenStack
pub struct OpenStackDriver {
    credential: CloudCredential,
    config: OpenStackConfig,
    api: OpenStackApiRef,
    local: LocalNode,
}

/// Networks as listed by whichever service provides them
enum NetworkListing {
    Advanced(Vec<WireNetwork>),
    Legacy(Vec<WireLegacyNetwork>),
}

impl OpenStackDriver {
    /// Create a driver talking HTTP to the credential's auth URL
    pub fn new(credential: CloudCredential, config: OpenStackConfig) -> Result<Self> {
        let client = OpenStackClient::new(credential.clone(), config.catalog.clone(), &config.http)?;
        Ok(Self::with_api(credential, config, Arc::new(client)))
    }

    /// Create a driver over an existing API implementation
    pub fn with_api(credential: CloudCredential, config: OpenStackConfig, api: OpenStackApiRef) -> Self {
        let local = LocalNode::new(config.local.clone());
        Self {
            credential,
            config,
            api,
            local,
        }
    }

    fn node_id(&self) -> Result<&str> {
        self.credential.node_id.as_deref().ok_or_else(|| {
            Error::Configuration("node_id is required to attach volumes to the local node".into())
        })
    }

    // -------------------------------------------------------------------------
    // Fetch helpers: not-found becomes None
    // -------------------------------------------------------------------------

    async fn fetch_volume(&self, volume_id: &str) -> Result<Option<WireVolume>> {
        match self.api.get_volume(volume_id).await {
            Ok(vol) => Ok(Some(vol)),
            Err(e) if e.is_not_found() => {
                debug!("Volume {} not found", volume_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_snapshot(&self, snapshot_id: &str) -> Result<Option<WireSnapshot>> {
        match self.api.get_snapshot(snapshot_id).await {
            Ok(snap) => Ok(Some(snap)),
            Err(e) if e.is_not_found() => {
                debug!("Snapshot {} not found", snapshot_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_server(&self, server_id: &str) -> Result<Option<WireServer>> {
        match self.api.get_server(server_id).await {
            Ok(server) if server.status.eq_ignore_ascii_case("SOFT_DELETED") => Ok(None),
            Ok(server) => Ok(Some(server)),
            Err(e) if e.is_not_found() => {
                debug!("Instance {} not found", server_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn wait_volume(
        &self,
        volume_id: &str,
        target: Option<&str>,
        failure_states: &[&str],
    ) -> Result<(bool, Option<WireVolume>)> {
        wait_for_state("volume", volume_id, target, failure_states, &self.config.poll, || {
            self.fetch_volume(volume_id)
        })
        .await
    }

    async fn wait_snapshot(
        &self,
        snapshot_id: &str,
        target: Option<&str>,
        failure_states: &[&str],
    ) -> Result<(bool, Option<WireSnapshot>)> {
        wait_for_state("snapshot", snapshot_id, target, failure_states, &self.config.poll, || {
            self.fetch_snapshot(snapshot_id)
        })
        .await
    }

    async fn wait_server(
        &self,
        server_id: &str,
        target: Option<&str>,
        failure_states: &[&str],
    ) -> Result<(bool, Option<WireServer>)> {
        wait_for_state("instance", server_id, target, failure_states, &self.config.poll, || {
            self.fetch_server(server_id)
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Cloud info sub-queries
    // -------------------------------------------------------------------------

    async fn availability_zones(&self) -> Result<Vec<AvailabilityZone>> {
        let zones = self.api.list_availability_zones().await?;
        Ok(zones
            .into_iter()
            .filter(|az| az.zone_state.available)
            .map(|az| AvailabilityZone {
                id: az.zone_name.clone(),
                name: az.zone_name,
            })
            .collect())
    }

    async fn flavors(&self) -> Result<Vec<Flavor>> {
        let flavors = self.api.list_flavors().await?;
        Ok(flavors
            .into_iter()
            .map(|f| Flavor {
                id: f.id,
                name: f.name,
                vcpus: f.vcpus,
                ram: f.ram,
            })
            .collect())
    }

    /// Keypairs, led by an empty entry meaning "no keypair"
    async fn keypairs(&self) -> Result<Vec<Keypair>> {
        let pairs = self.api.list_keypairs().await?;
        let mut keypairs = vec![Keypair {
            id: String::new(),
            name: String::new(),
        }];
        keypairs.extend(pairs.into_iter().map(|p| Keypair {
            id: p.keypair.name.clone(),
            name: p.keypair.name,
        }));
        Ok(keypairs)
    }

    async fn network_listing(&self, advanced: bool) -> Result<NetworkListing> {
        if advanced {
            Ok(NetworkListing::Advanced(self.api.list_networks().await?))
        } else {
            Ok(NetworkListing::Legacy(self.api.list_legacy_networks().await?))
        }
    }

    async fn subnets(&self, advanced: bool) -> Result<Vec<WireSubnet>> {
        if advanced {
            self.api.list_subnets().await
        } else {
            Ok(Vec::new())
        }
    }

    async fn security_groups(&self, advanced: bool, project_id: &str) -> Result<Vec<SecurityGroup>> {
        let groups = if advanced {
            self.api
                .list_security_groups()
                .await?
                .into_iter()
                .filter(|sg| sg.owned_by(project_id))
                .collect()
        } else {
            self.api.list_compute_security_groups().await?
        };
        Ok(groups
            .into_iter()
            .map(|sg| SecurityGroup {
                id: sg.id,
                name: sg.name,
            })
            .collect())
    }

    async fn compute_quota(&self) -> Result<ComputeQuota> {
        match self.api.compute_quota().await {
            Ok(set) => Ok(set.into()),
            Err(e) => {
                warn!(
                    "Failed to get compute quota, assuming no limit. Check compute quota manually: {}",
                    e
                );
                Ok(ComputeQuota::default())
            }
        }
    }

    async fn volume_quota(&self) -> Result<VolumeQuota> {
        match self.api.volume_quota().await {
            Ok(set) => Ok(set.into()),
            Err(e) => {
                warn!(
                    "Failed to get volume quota, assuming no limit. Check volume quota manually: {}",
                    e
                );
                Ok(VolumeQuota::default())
            }
        }
    }

    /// Port quota total, -1 when unknown
    async fn port_total(&self, advanced: bool) -> Result<i64> {
        if !advanced {
            return Ok(QuotaUsage::UNLIMITED);
        }
        match self.api.network_quota().await {
            Ok(quota) => Ok(quota.port),
            Err(e) => {
                warn!(
                    "Failed to get network quota, assuming no limit. Check network quota manually: {}",
                    e
                );
                Ok(QuotaUsage::UNLIMITED)
            }
        }
    }

    /// Ports currently allocated, 0 when unknown
    async fn port_used(&self, advanced: bool) -> Result<i64> {
        if !advanced {
            return Ok(0);
        }
        match self.api.list_ports(None).await {
            Ok(ports) => Ok(ports.len() as i64),
            Err(e) => {
                warn!("Failed to list ports, assuming none in use: {}", e);
                Ok(0)
            }
        }
    }

    /// Quota across services with per-service fallback to unlimited
    async fn current_quota(&self, advanced: bool) -> Result<QuotaSnapshot> {
        let (compute, volume, port_total, port_used) = futures::try_join!(
            self.compute_quota(),
            self.volume_quota(),
            self.port_total(advanced),
            self.port_used(advanced),
        )?;
        let ports = advanced.then(|| QuotaUsage::new(port_used, port_total));
        Ok(build_quota(compute, volume, ports))
    }

    // -------------------------------------------------------------------------
    // Attach
    // -------------------------------------------------------------------------

    /// One attach attempt; `None` when the device node never showed up
    async fn attach_once(&self, node_id: &str, volume_id: &str) -> Result<Option<AttachedVolume>> {
        self.api
            .attach_volume(node_id, volume_id)
            .await
            .map_err(|e| match e {
                Error::ServerError { code, message } => Error::backend(
                    "attach_volume",
                    volume_id,
                    format!(
                        "API error {} attaching to instance {}. If the cloud is healthy, the \
                         instance may have reached its maximum number of attached disks; \
                         clean up unused volumes and try again: {}",
                        code, node_id, message
                    ),
                ),
                other => other,
            })?;

        let (ok, vol) = self
            .wait_volume(volume_id, Some(VOLUME_ATTACHED_STATUS), &["AVAILABLE", "ERROR"])
            .await?;
        let vol = match (ok, vol) {
            (true, Some(vol)) => vol,
            (_, vol) => {
                return Err(Error::backend(
                    "attach_volume",
                    volume_id,
                    format!(
                        "attach to instance {} ended in state {}",
                        node_id,
                        status_of(vol.as_ref().map(|v| v.status.as_str()))
                    ),
                ))
            }
        };
        info!("Attached volume {} to instance {}", volume_id, node_id);

        let path = self.local.device_path(volume_id);
        if !self.local.wait_for_device(&path, &self.config.attach).await {
            warn!("Device {} not found for volume {}, will attach again", path.display(), volume_id);
            return Ok(None);
        }

        Ok(Some(AttachedVolume {
            volume: to_volume(vol),
            path,
        }))
    }

    async fn detach_with(&self, volume_id: &str, failure_states: &[&str]) -> Result<Volume> {
        let node_id = self.node_id()?;
        info!("Detaching volume {} from instance {}", volume_id, node_id);
        self.api
            .detach_volume(node_id, volume_id)
            .await
            .map_err(log_failure("detach_volume", volume_id))?;

        let (ok, vol) = self
            .wait_volume(volume_id, Some("AVAILABLE"), failure_states)
            .await
            .map_err(log_failure("detach_volume", volume_id))?;
        match (ok, vol) {
            (true, Some(vol)) => {
                info!("Detached volume {} from instance {}", volume_id, node_id);
                Ok(to_volume(vol))
            }
            (_, vol) => Err(log_failure("detach_volume", volume_id)(Error::backend(
                "detach_volume",
                volume_id,
                format!(
                    "detach from instance {} ended in state {}",
                    node_id,
                    status_of(vol.as_ref().map(|v| v.status.as_str()))
                ),
            ))),
        }
    }

    // -------------------------------------------------------------------------
    // Instance helpers
    // -------------------------------------------------------------------------

    /// Resolve security group ids to names; unknown ids are dropped
    async fn security_group_names(&self, ids: &[String]) -> Result<Vec<NameRef>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.api.session_info().await?;
        let groups = self
            .security_groups(session.advanced_networking, &session.project_id)
            .await?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                let found = groups.iter().find(|sg| &sg.id == id);
                if found.is_none() {
                    warn!("Security group {} not found, skipping", id);
                }
                found.map(|sg| NameRef { name: sg.name.clone() })
            })
            .collect())
    }

    /// Best-effort delete of an instance that failed to boot
    async fn cleanup_instance(&self, server_id: &str) {
        match self.fetch_server(server_id).await {
            Ok(Some(_)) => {
                if let Err(e) = self.api.delete_server(server_id).await {
                    warn!("Failed to clean up instance {}: {}", server_id, e);
                } else {
                    info!("Cleaned up failed instance {}", server_id);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to clean up instance {}: {}", server_id, e),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn status_of(status: Option<&str>) -> String {
    status.unwrap_or("<gone>").to_string()
}

/// Log a failed operation with context and pass the error through
fn log_failure<'a>(operation: &'a str, id: &'a str) -> impl Fn(Error) -> Error + 'a {
    move |e| {
        error!("Failed to {} ({}): {}", operation.replace('_', " "), id, e);
        e
    }
}

fn to_volume(vol: WireVolume) -> Volume {
    let mut extra = BTreeMap::new();
    if let Some(t) = vol.volume_type {
        extra.insert("volume_type".to_string(), t);
    }
    if let Some(az) = vol.availability_zone {
        extra.insert("availability_zone".to_string(), az);
    }
    if let Some(b) = vol.bootable {
        extra.insert("bootable".to_string(), b);
    }
    Volume {
        name: vol.name.unwrap_or_default(),
        id: vol.id,
        status: vol.status,
        size: vol.size,
        extra,
    }
}

fn to_snapshot(snap: WireSnapshot) -> Snapshot {
    Snapshot {
        name: snap.name.unwrap_or_default(),
        id: snap.id,
        status: snap.status,
        size: snap.size,
        volume_id: snap.volume_id,
    }
}

fn to_instance(server: WireServer) -> Instance {
    let mut public_ips = Vec::new();
    let mut private_ips = Vec::new();
    let mut networks = BTreeMap::new();
    for (net, addrs) in &server.addresses {
        for addr in addrs {
            if addr.ip_type.as_deref() == Some("floating") {
                public_ips.push(addr.addr.clone());
            } else {
                private_ips.push(addr.addr.clone());
            }
        }
        networks.insert(net.clone(), addrs.iter().map(|a| a.addr.clone()).collect());
    }
    let mut extra = BTreeMap::new();
    if let Some(az) = server.availability_zone {
        extra.insert("availability_zone".to_string(), az);
    }
    Instance {
        id: server.id,
        name: server.name,
        state: server.status,
        public_ips,
        private_ips,
        networks,
        security_groups: server.security_groups.into_iter().map(|sg| sg.name).collect(),
        extra,
    }
}

/// Boot-from-volume request body
fn build_server_request(
    boot_volume: &Volume,
    data_volumes: &[Volume],
    placement: &PlacementParams,
    source: &SourceExtra,
    security_groups: Vec<NameRef>,
    timestamp: i64,
) -> CreateServerRequest {
    let delete = placement.delete_on_termination;
    let mut block_devices = vec![BlockDeviceMapping::volume(&boot_volume.id, boot_volume.size, 0, delete)];
    block_devices.extend(
        data_volumes
            .iter()
            .enumerate()
            .map(|(i, vol)| BlockDeviceMapping::volume(&vol.id, vol.size, i as i32 + 1, delete)),
    );

    let mut metadata = BTreeMap::new();
    metadata.insert("os_type".to_string(), source.os_type.clone());
    metadata.insert("os_version".to_string(), source.os_version.clone());

    CreateServerRequest {
        server: ServerSpec {
            name: placement
                .instance_name
                .clone()
                .unwrap_or_else(|| format!("RECOVER:{}", timestamp)),
            flavor_ref: placement.flavor.clone(),
            networks: vec![ServerNetwork {
                uuid: placement.network.id.clone(),
                fixed_ip: placement.network.addr.clone().filter(|a| !a.is_empty()),
            }],
            security_groups,
            block_device_mapping_v2: block_devices,
            metadata,
            availability_zone: placement.availability_zone.clone().filter(|az| !az.is_empty()),
            key_name: placement.keypair.clone().filter(|k| !k.is_empty()),
        },
    }
}

// =============================================================================
// CloudDriver Implementation
// =============================================================================

#[async_trait]
impl CloudDriver for OpenStackDriver {
    fn cloud_type(&self) -> CloudType {
        CloudType::OpenStack
    }

    async fn authenticate(&self) -> Result<SessionInfo> {
        self.api.authenticate().await.map_err(|e| {
            error!("Failed to authenticate to {}: {}", self.credential.auth_url, e);
            e
        })
    }

    async fn check_register(&self) -> Result<NodeInfo> {
        let macs = self.local.mac_addresses()?;
        if macs.is_empty() {
            return Err(Error::NotFound {
                kind: "local MAC address".into(),
                id: "local node".into(),
            });
        }

        // Fresh session so a newly registered node sees current data
        self.api.authenticate().await?;
        let servers = self.api.list_servers().await?;

        for server in &servers {
            for addrs in server.addresses.values() {
                for addr in addrs {
                    let Some(mac) = addr.mac_addr.as_deref() else {
                        continue;
                    };
                    if macs.iter().any(|m| m.eq_ignore_ascii_case(mac)) {
                        info!("Local node is instance {} ({})", server.id, mac);
                        return Ok(NodeInfo {
                            node_id: server.id.clone(),
                            node_mac_addr: mac.to_lowercase(),
                            external_ip: Some(addr.addr.clone()),
                        });
                    }
                }
            }
        }

        error!("No instance in this project owns local MACs {:?}", macs);
        Err(Error::NotFound {
            kind: "instance".into(),
            id: format!("mac {}", macs.join(",")),
        })
    }

    async fn check_cloud_apis(&self) -> Result<()> {
        let session = self.api.session_info().await?;
        futures::try_join!(self.api.list_servers(), self.api.list_volume_types())?;
        if session.endpoints.contains_key("image") {
            self.api.list_images(1).await?;
        }
        if session.advanced_networking {
            self.api.list_networks().await?;
        }
        info!("Cloud APIs reachable: {:?}", session.endpoints.keys().collect::<Vec<_>>());
        Ok(())
    }

    async fn check_cloud_quota(&self) -> Result<()> {
        let quota = self.volume_quota().await?;
        quota.volumes.ensure_room("volumes", 1)?;
        quota.gigabytes.ensure_room("gigabytes", 1)?;
        Ok(())
    }

    async fn get_cloud_info(&self) -> Result<CloudInfo> {
        let session = self.api.session_info().await?;
        let advanced = session.advanced_networking;
        let project_id = session.project_id.as_str();

        let (
            availability_zones,
            flavors,
            keypairs,
            networks,
            subnets,
            volume_quota,
            compute_quota,
            port_total,
            port_used,
            security_groups,
        ) = futures::try_join!(
            self.availability_zones(),
            self.flavors(),
            self.keypairs(),
            self.network_listing(advanced),
            self.subnets(advanced),
            self.volume_quota(),
            self.compute_quota(),
            self.port_total(advanced),
            self.port_used(advanced),
            self.security_groups(advanced, project_id),
        )
        .map_err(|e| {
            error!("Failed to collect cloud info: {}", e);
            e
        })?;

        let networks = match networks {
            NetworkListing::Advanced(nets) => build_networks(&nets, &subnets, project_id),
            NetworkListing::Legacy(nets) => legacy_networks(nets),
        };
        let ports = advanced.then(|| QuotaUsage::new(port_used, port_total));

        Ok(CloudInfo {
            availability_zones,
            flavors,
            keypairs,
            networks,
            security_groups,
            quota: build_quota(compute_quota, volume_quota, ports),
        })
    }

    async fn get_cloud_quota(&self) -> Result<CloudQuota> {
        let quota = self.volume_quota().await?;
        Ok(CloudQuota {
            total_capacity: quota.gigabytes.total,
            ..CloudQuota::default()
        })
    }

    fn volume_attached_status(&self) -> &'static str {
        VOLUME_ATTACHED_STATUS
    }

    async fn get_volume(&self, volume_id: &str) -> Result<Option<Volume>> {
        let vol = self
            .fetch_volume(volume_id)
            .await
            .map_err(log_failure("get_volume", volume_id))?;
        Ok(vol.map(to_volume))
    }

    async fn create_volume(&self, size: u64, name: &str, volume_type: Option<&str>) -> Result<Volume> {
        let name = truncate(name, NAME_MAX_LEN);
        let availability_zone = self.credential.volume_availability_zone.clone();
        info!(
            "Creating volume: {} ({} GB, type: {:?}, AZ: {:?})",
            name, size, volume_type, availability_zone
        );

        let request = CreateVolumeRequest {
            volume: VolumeSpec {
                size,
                name,
                volume_type: volume_type.map(str::to_string),
                availability_zone,
                snapshot_id: None,
            },
        };
        let created = self
            .api
            .create_volume(&request)
            .await
            .map_err(log_failure("create_volume", "new"))?;

        let (ok, vol) = self
            .wait_volume(&created.id, Some("AVAILABLE"), &["ERROR"])
            .await
            .map_err(log_failure("create_volume", &created.id))?;
        match (ok, vol) {
            (true, Some(vol)) => {
                info!("Created volume {}", vol.id);
                Ok(to_volume(vol))
            }
            (_, vol) => Err(log_failure("create_volume", &created.id)(Error::backend(
                "create_volume",
                &created.id,
                format!("volume ended in state {}", status_of(vol.as_ref().map(|v| v.status.as_str()))),
            ))),
        }
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        info!("Deleting volume: {}", volume_id);
        if self
            .fetch_volume(volume_id)
            .await
            .map_err(log_failure("delete_volume", volume_id))?
            .is_none()
        {
            info!("Volume {} already gone", volume_id);
            return Ok(());
        }

        self.api
            .delete_volume(volume_id)
            .await
            .map_err(log_failure("delete_volume", volume_id))?;

        // A volume with dependent snapshots drops back to AVAILABLE
        let (ok, vol) = self
            .wait_volume(volume_id, None, &["AVAILABLE", "ERROR_DELETING"])
            .await
            .map_err(log_failure("delete_volume", volume_id))?;
        if !ok {
            return Err(log_failure("delete_volume", volume_id)(Error::backend(
                "delete_volume",
                volume_id,
                format!("volume ended in state {}", status_of(vol.as_ref().map(|v| v.status.as_str()))),
            )));
        }
        info!("Deleted volume: {}", volume_id);
        Ok(())
    }

    async fn get_volume_snapshot(&self, volume_id: &str, snapshot_id: &str) -> Result<Option<Snapshot>> {
        debug!("Getting snapshot {} of volume {}", snapshot_id, volume_id);
        let snap = self
            .fetch_snapshot(snapshot_id)
            .await
            .map_err(log_failure("get_volume_snapshot", snapshot_id))?;
        Ok(snap.map(to_snapshot))
    }

    async fn create_volume_snapshot(&self, volume_id: &str, name: &str) -> Result<Snapshot> {
        let name = truncate(name, NAME_MAX_LEN);
        info!("Creating snapshot {} of volume {}", name, volume_id);

        let request = CreateSnapshotRequest {
            snapshot: SnapshotSpec {
                name,
                volume_id: volume_id.to_string(),
                force: true,
            },
        };
        let created = self
            .api
            .create_snapshot(&request)
            .await
            .map_err(log_failure("create_volume_snapshot", volume_id))?;

        let (ok, snap) = self
            .wait_snapshot(&created.id, Some("AVAILABLE"), &["ERROR"])
            .await
            .map_err(log_failure("create_volume_snapshot", &created.id))?;
        match (ok, snap) {
            (true, Some(snap)) => {
                info!("Created snapshot {}", snap.id);
                Ok(to_snapshot(snap))
            }
            (_, snap) => Err(log_failure("create_volume_snapshot", &created.id)(Error::backend(
                "create_volume_snapshot",
                &created.id,
                format!("snapshot ended in state {}", status_of(snap.as_ref().map(|s| s.status.as_str()))),
            ))),
        }
    }

    async fn delete_volume_snapshot(&self, volume_id: &str, snapshot_id: &str) -> Result<()> {
        info!("Deleting snapshot {} of volume {}", snapshot_id, volume_id);
        if self
            .fetch_snapshot(snapshot_id)
            .await
            .map_err(log_failure("delete_volume_snapshot", snapshot_id))?
            .is_none()
        {
            info!("Snapshot {} already gone", snapshot_id);
            return Ok(());
        }

        self.api
            .delete_snapshot(snapshot_id)
            .await
            .map_err(log_failure("delete_volume_snapshot", snapshot_id))?;

        // A snapshot with derived volumes drops back to AVAILABLE
        let (ok, snap) = self
            .wait_snapshot(snapshot_id, None, &["AVAILABLE", "ERROR_DELETING"])
            .await
            .map_err(log_failure("delete_volume_snapshot", snapshot_id))?;
        if !ok {
            return Err(log_failure("delete_volume_snapshot", snapshot_id)(Error::backend(
                "delete_volume_snapshot",
                snapshot_id,
                format!("snapshot ended in state {}", status_of(snap.as_ref().map(|s| s.status.as_str()))),
            )));
        }
        info!("Deleted snapshot: {}", snapshot_id);
        Ok(())
    }

    async fn create_volume_from_snapshot(&self, snapshot_id: &str, name: Option<&str>) -> Result<Volume> {
        let snap = self
            .fetch_snapshot(snapshot_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "snapshot".into(),
                id: snapshot_id.into(),
            })
            .map_err(log_failure("create_volume_from_snapshot", snapshot_id))?;
        let source_id = snap
            .volume_id
            .clone()
            .ok_or_else(|| Error::NotFound {
                kind: "volume".into(),
                id: snapshot_id.into(),
            })
            .map_err(log_failure("create_volume_from_snapshot", snapshot_id))?;
        let source = self
            .fetch_volume(&source_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "volume".into(),
                id: source_id.clone(),
            })
            .map_err(log_failure("create_volume_from_snapshot", snapshot_id))?;

        let name = match name {
            Some(name) => truncate(name, NAME_MAX_LEN),
            None => {
                let vol_name = source.name.clone().unwrap_or_else(|| source.id.clone());
                let snap_name = snap.name.clone().unwrap_or_else(|| snap.id.clone());
                format!(
                    "{}:{}:{}",
                    truncate(&vol_name, DERIVED_NAME_PART_LEN),
                    truncate(&snap_name, DERIVED_NAME_PART_LEN),
                    chrono::Utc::now().timestamp()
                )
            }
        };
        info!(
            "Creating volume {} from snapshot {} ({} GB)",
            name, snapshot_id, source.size
        );

        let request = CreateVolumeRequest {
            volume: VolumeSpec {
                size: source.size,
                name,
                volume_type: source.volume_type.clone(),
                availability_zone: source.availability_zone.clone(),
                snapshot_id: Some(snap.id.clone()),
            },
        };
        let created = self
            .api
            .create_volume(&request)
            .await
            .map_err(log_failure("create_volume_from_snapshot", snapshot_id))?;

        let (ok, vol) = self
            .wait_volume(&created.id, Some("AVAILABLE"), &["ERROR"])
            .await
            .map_err(log_failure("create_volume_from_snapshot", &created.id))?;
        match (ok, vol) {
            (true, Some(vol)) => Ok(to_volume(vol)),
            (_, vol) => Err(log_failure("create_volume_from_snapshot", &created.id)(Error::backend(
                "create_volume_from_snapshot",
                &created.id,
                format!("volume ended in state {}", status_of(vol.as_ref().map(|v| v.status.as_str()))),
            ))),
        }
    }

    async fn attach_volume_to_local(&self, volume_id: &str) -> Result<AttachedVolume> {
        let node_id = self.node_id()?;
        let attempts = self.config.attach.attempts;
        info!("Attaching volume {} to instance {}", volume_id, node_id);

        for attempt in 1..=attempts {
            info!("Attach attempt {}/{} for volume {}", attempt, attempts, volume_id);
            match self
                .attach_once(node_id, volume_id)
                .await
                .map_err(log_failure("attach_volume_to_local", volume_id))?
            {
                Some(attached) => return Ok(attached),
                None => {
                    self.detach_with(volume_id, &["ERROR"]).await?;
                }
            }
        }

        Err(log_failure("attach_volume_to_local", volume_id)(Error::backend(
            "attach_volume_to_local",
            volume_id,
            format!(
                "device node never appeared on local instance {} after {} attempts",
                node_id, attempts
            ),
        )))
    }

    async fn detach_volume(&self, volume_id: &str) -> Result<Volume> {
        self.detach_with(volume_id, &["IN-USE", "ERROR"]).await
    }

    fn volume_path_in_node(&self, volume_id: &str) -> VolumePath {
        VolumePath {
            id: volume_id.to_string(),
            path: self.local.device_path(volume_id),
        }
    }

    async fn get_volume_types(&self) -> Vec<VolumeType> {
        match self.api.list_volume_types().await {
            Ok(types) => types
                .into_iter()
                .map(|t| VolumeType {
                    id: t.id,
                    name: t.name,
                    description: t.description.unwrap_or_default(),
                })
                .collect(),
            Err(e) => {
                error!("Failed to list volume types: {}", e);
                Vec::new()
            }
        }
    }

    async fn check_instance_params(&self, instance: &MigrationInstance) -> Result<ResolvedPlacement> {
        let info = self.get_cloud_info().await?;
        let placement = &instance.placement;

        let availability_zone = match &placement.availability_zone {
            Some(name) => Some(
                info.availability_zones
                    .iter()
                    .find(|az| &az.name == name)
                    .cloned()
                    .ok_or_else(|| Error::Validation(format!("Could not find availability zone {}", name)))?,
            ),
            None => None,
        };

        let keypair = match &placement.keypair {
            Some(name) => Some(
                info.keypairs
                    .iter()
                    .find(|k| &k.name == name)
                    .cloned()
                    .ok_or_else(|| Error::Validation(format!("Could not find keypair {}", name)))?,
            ),
            None => None,
        };

        let flavor = info
            .flavors
            .iter()
            .find(|f| f.id == placement.flavor)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("Could not find flavor {}", placement.flavor)))?;

        if !info.networks.iter().any(|n| n.id == placement.network.id) {
            return Err(Error::Validation(format!(
                "Could not find network {}",
                placement.network.id
            )));
        }

        let security_groups = placement
            .security_groups
            .iter()
            .map(|id| {
                info.security_groups
                    .iter()
                    .find(|sg| &sg.id == id)
                    .cloned()
                    .ok_or_else(|| Error::Validation(format!("Could not find security group {}", id)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ResolvedPlacement {
            availability_zone,
            keypair,
            flavor,
            network: placement.network.clone(),
            security_groups,
        })
    }

    async fn check_quota(&self, instance: &MigrationInstance, resolved: &ResolvedPlacement) -> Result<()> {
        let session = self.api.session_info().await?;
        let quota = self.current_quota(session.advanced_networking).await?;

        check_flavor(&quota, &resolved.flavor)?;
        check_ports(&quota)?;

        let mut needed_gb = 0u64;
        for snap in &instance.snapshots {
            match self.fetch_snapshot(&snap.cloud_snap_id).await? {
                Some(s) => needed_gb += s.size,
                None => debug!("Snapshot {} is gone, not counted", snap.cloud_snap_id),
            }
        }
        check_volume_quota(&quota, instance.snapshots.len(), needed_gb)?;

        info!("Quota check passed for instance {}", instance.id);
        Ok(())
    }

    async fn check_ip_addr(&self, instance: &MigrationInstance) -> IpAddrStatus {
        let network = &instance.placement.network;
        let Some(addr) = network.addr.as_deref().filter(|a| !a.is_empty()) else {
            return IpAddrStatus::Unknown;
        };

        match self.api.list_ports(Some(&network.id)).await {
            Ok(ports) => {
                let in_use = ports
                    .iter()
                    .filter(|p| p.network_id == network.id)
                    .flat_map(|p| p.fixed_ips.iter())
                    .any(|ip| ip.ip_address == addr);
                if in_use {
                    warn!("IP address {} is already in use on network {}", addr, network.id);
                    IpAddrStatus::InUse
                } else {
                    IpAddrStatus::Available
                }
            }
            Err(e) => {
                error!("Failed to check IP address {}: {}", addr, e);
                IpAddrStatus::Unknown
            }
        }
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<Instance>> {
        let server = self
            .fetch_server(instance_id)
            .await
            .map_err(log_failure("get_instance", instance_id))?;
        Ok(server.map(to_instance))
    }

    async fn create_instance(
        &self,
        boot_volume: &Volume,
        data_volumes: &[Volume],
        placement: &PlacementParams,
        source: &SourceExtra,
    ) -> Result<Instance> {
        self.api
            .set_bootable(&boot_volume.id)
            .await
            .map_err(log_failure("set_bootable", &boot_volume.id))?;

        let security_groups = self.security_group_names(&placement.security_groups).await?;
        let request = build_server_request(
            boot_volume,
            data_volumes,
            placement,
            source,
            security_groups,
            chrono::Utc::now().timestamp(),
        );
        info!(
            "Creating instance {} from volume {} with {} data volumes",
            request.server.name,
            boot_volume.id,
            data_volumes.len()
        );
        debug!("Create instance request: {:?}", request);

        let created = self
            .api
            .create_server(&request)
            .await
            .map_err(log_failure("create_instance", &boot_volume.id))?;
        let server_id = match created {
            CreatedServer::One(server) => server.id,
            CreatedServer::Many(mut servers) if servers.len() == 1 => {
                warn!(
                    "Boot from volume returned a list instead of a single server; \
                     check the compute API version with the cloud provider"
                );
                servers.remove(0).id
            }
            CreatedServer::Many(servers) => {
                for server in &servers {
                    self.cleanup_instance(&server.id).await;
                }
                return Err(Error::backend(
                    "create_instance",
                    &boot_volume.id,
                    format!("boot from volume returned {} servers", servers.len()),
                ))
            }
        };

        match self.wait_server(&server_id, Some("ACTIVE"), &["ERROR"]).await {
            Ok((true, Some(server))) => {
                info!("Created instance {}", server_id);
                Ok(to_instance(server))
            }
            Ok((_, server)) => {
                let state = status_of(server.as_ref().map(|s| s.status.as_str()));
                error!("Instance {} failed to boot, state {}", server_id, state);
                self.cleanup_instance(&server_id).await;
                Err(Error::backend(
                    "create_instance",
                    &server_id,
                    format!("instance ended in state {}", state),
                ))
            }
            Err(e) => {
                error!("Instance {} failed to boot: {}", server_id, e);
                self.cleanup_instance(&server_id).await;
                Err(e)
            }
        }
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        info!("Deleting instance: {}", instance_id);
        if self
            .fetch_server(instance_id)
            .await
            .map_err(log_failure("delete_instance", instance_id))?
            .is_none()
        {
            return Ok(());
        }

        self.api
            .delete_server(instance_id)
            .await
            .map_err(log_failure("delete_instance", instance_id))?;

        let (ok, server) = self
            .wait_server(instance_id, None, &["ERROR"])
            .await
            .map_err(log_failure("delete_instance", instance_id))?;
        if !ok {
            return Err(log_failure("delete_instance", instance_id)(Error::backend(
                "delete_instance",
                instance_id,
                format!("instance ended in state {}", status_of(server.as_ref().map(|s| s.status.as_str()))),
            )));
        }
        info!("Deleted instance: {}", instance_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::openstack::fake::{FakeApi, FakeServer};
    use assert_matches::assert_matches;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn credential(node_id: Option<&str>) -> CloudCredential {
        CloudCredential {
            cloud_type: CloudType::OpenStack,
            auth_url: "http://keystone:5000/v3".into(),
            username: "admin".into(),
            password: "secret".into(),
            project_name: "demo".into(),
            domain_name: "default".into(),
            region: "RegionOne".into(),
            node_id: node_id.map(str::to_string),
            volume_availability_zone: Some("az-vol".into()),
        }
    }

    fn driver(api: &Arc<FakeApi>, dev: &Path) -> OpenStackDriver {
        driver_for(api, dev, Some("node-1"))
    }

    fn driver_for(api: &Arc<FakeApi>, dev: &Path, node_id: Option<&str>) -> OpenStackDriver {
        let config = OpenStackConfig {
            local: LocalNodeConfig {
                sysfs_path: PathBuf::from("/nonexistent"),
                dev_path: dev.to_path_buf(),
                mac_override: Some("FA:16:3E:00:00:01".into()),
            },
            ..Default::default()
        };
        OpenStackDriver::with_api(credential(node_id), config, api.clone())
    }

    fn migration(snapshots: &[&str], addr: Option<&str>) -> MigrationInstance {
        let mut placement = PlacementParams::new("f-small", "net-1");
        placement.network.addr = addr.map(str::to_string);
        MigrationInstance {
            id: "host-1".into(),
            placement,
            snapshots: snapshots
                .iter()
                .map(|id| SnapshotRef {
                    cloud_snap_id: id.to_string(),
                    index: None,
                })
                .collect(),
            source_extra: SourceExtra {
                os_type: "LINUX".into(),
                os_version: "CentOS 7.9".into(),
                ..Default::default()
            },
        }
    }

    fn seed_inventory(api: &FakeApi) {
        let mut state = api.state.lock();
        state.zones = vec![
            WireAvailabilityZone {
                zone_name: "nova".into(),
                zone_state: ZoneState { available: true },
            },
            WireAvailabilityZone {
                zone_name: "broken".into(),
                zone_state: ZoneState { available: false },
            },
        ];
        state.flavors = vec![WireFlavor {
            id: "f-small".into(),
            name: "m1.small".into(),
            vcpus: 2,
            ram: 2048,
        }];
        state.keypairs = vec!["ops".into()];
        state.networks = vec![WireNetwork {
            id: "net-1".into(),
            name: "private".into(),
            status: "ACTIVE".into(),
            project_id: Some("proj-1".into()),
            ..Default::default()
        }];
        state.subnets = vec![WireSubnet {
            name: "sub-1".into(),
            network_id: "net-1".into(),
            cidr: "10.0.0.0/24".into(),
            gateway_ip: Some("10.0.0.1".into()),
            allocation_pools: serde_json::Value::Null,
        }];
        state.ports = vec![WirePort {
            id: "port-1".into(),
            network_id: "net-1".into(),
            fixed_ips: vec![FixedIp {
                ip_address: "10.0.0.5".into(),
            }],
        }];
        state.security_groups = vec![
            WireSecurityGroup {
                id: "sg-1".into(),
                name: "default".into(),
                project_id: Some("proj-1".into()),
                tenant_id: None,
            },
            WireSecurityGroup {
                id: "sg-9".into(),
                name: "foreign".into(),
                project_id: Some("proj-9".into()),
                tenant_id: None,
            },
        ];
        state.network_quota = NetworkQuota { port: 50 };
    }

    // -------------------------------------------------------------------------
    // Volumes
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_delete_missing_volume_is_noop() {
        let api = Arc::new(FakeApi::new());
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        driver.delete_volume("vol-missing").await.unwrap();

        assert_eq!(api.calls("delete_volume"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_volume_waits_until_gone() {
        let api = Arc::new(FakeApi::new());
        api.add_volume("vol-1", "available", 10);
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        driver.delete_volume("vol-1").await.unwrap();

        assert_eq!(api.calls("delete_volume"), 1);
        assert!(driver.get_volume("vol-1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_volume_polls_until_available() {
        let api = Arc::new(FakeApi::new());
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());
        let long_name = "x".repeat(200);

        let vol = driver.create_volume(10, &long_name, Some("ssd")).await.unwrap();

        assert_eq!(vol.status, "available");
        assert_eq!(vol.extra.get("volume_type").map(String::as_str), Some("ssd"));
        assert_eq!(api.calls("get_volume"), 2);

        let state = api.state.lock();
        let request = &state.created_volumes[0].volume;
        assert_eq!(request.name.len(), NAME_MAX_LEN);
        assert_eq!(request.availability_zone.as_deref(), Some("az-vol"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_volume_error_state() {
        let api = Arc::new(FakeApi::new());
        api.state.lock().create_volume_script =
            ["creating", "error"].iter().map(|s| s.to_string()).collect();
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let result = driver.create_volume(10, "data", None).await;

        assert_matches!(result, Err(Error::BackendOperation { ref reason, .. }) if reason.contains("error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_volume_from_snapshot_inherits_source() {
        let api = Arc::new(FakeApi::new());
        api.add_volume("vol-src", "available", 40);
        api.add_snapshot("snap-1", "vol-src", 40);
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let vol = driver.create_volume_from_snapshot("snap-1", None).await.unwrap();

        assert_eq!(vol.size, 40);
        let state = api.state.lock();
        let request = &state.created_volumes[0].volume;
        assert!(request.name.starts_with("vol-src-name:snap-1-name:"));
        assert_eq!(request.volume_type.as_deref(), Some("ssd"));
        assert_eq!(request.availability_zone.as_deref(), Some("nova"));
        assert_eq!(request.snapshot_id.as_deref(), Some("snap-1"));
    }

    #[tokio::test]
    async fn test_create_volume_from_orphan_snapshot() {
        let api = Arc::new(FakeApi::new());
        api.add_snapshot("snap-1", "vol-src", 40);
        api.state.lock().snapshots.get_mut("snap-1").unwrap().volume_id = None;
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        assert_matches!(
            driver.create_volume_from_snapshot("snap-1", None).await,
            Err(Error::NotFound { ref kind, ref id }) if kind == "volume" && id == "snap-1"
        );
        assert_eq!(api.calls("get_volume"), 0);
        assert_eq!(api.calls("create_volume"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_lifecycle() {
        let api = Arc::new(FakeApi::new());
        api.add_volume("vol-1", "available", 8);
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let snap = driver.create_volume_snapshot("vol-1", "nightly").await.unwrap();
        assert_eq!(snap.size, 8);
        assert_eq!(snap.volume_id.as_deref(), Some("vol-1"));

        driver.delete_volume_snapshot("vol-1", &snap.id).await.unwrap();
        assert!(driver.get_volume_snapshot("vol-1", &snap.id).await.unwrap().is_none());

        // already gone
        driver.delete_volume_snapshot("vol-1", &snap.id).await.unwrap();
        assert_eq!(api.calls("delete_snapshot"), 1);
    }

    #[tokio::test]
    async fn test_volume_types_swallow_errors() {
        let api = Arc::new(FakeApi::new());
        api.fail("list_volume_types", 403);
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        assert!(driver.get_volume_types().await.is_empty());
    }

    // -------------------------------------------------------------------------
    // Attach
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_attach_retries_then_fails() {
        let api = Arc::new(FakeApi::new());
        api.add_volume("vol-1", "available", 10);
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let result = driver.attach_volume_to_local("vol-1").await;

        assert_matches!(result, Err(Error::BackendOperation { ref reason, .. }) if reason.contains("node-1"));
        assert_eq!(api.calls("attach_volume"), 4);
        assert_eq!(api.calls("detach_volume"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_finds_device() {
        let api = Arc::new(FakeApi::new());
        api.add_volume("vol-1", "available", 10);
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());
        let device = driver.volume_path_in_node("vol-1").path;
        std::fs::create_dir_all(device.parent().unwrap()).unwrap();
        std::fs::write(&device, b"").unwrap();

        let attached = driver.attach_volume_to_local("vol-1").await.unwrap();

        assert_eq!(attached.path, device);
        assert_eq!(attached.volume.status, "in-use");
        assert_eq!(api.calls("attach_volume"), 1);
        assert_eq!(api.calls("detach_volume"), 0);

        let detached = driver.detach_volume("vol-1").await.unwrap();
        assert_eq!(detached.status, "available");
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_server_error_hints_disk_limit() {
        let api = Arc::new(FakeApi::new());
        api.add_volume("vol-1", "available", 10);
        api.fail("attach_volume", 500);
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let result = driver.attach_volume_to_local("vol-1").await;

        assert_matches!(
            result,
            Err(Error::BackendOperation { ref reason, .. }) if reason.contains("maximum number of attached disks")
        );
        assert_eq!(api.calls("attach_volume"), 1);
    }

    #[tokio::test]
    async fn test_attach_requires_node_id() {
        let api = Arc::new(FakeApi::new());
        let dev = TempDir::new().unwrap();
        let driver = driver_for(&api, dev.path(), None);

        assert_matches!(
            driver.attach_volume_to_local("vol-1").await,
            Err(Error::Configuration(_))
        );
        assert_eq!(api.calls("attach_volume"), 0);
    }

    // -------------------------------------------------------------------------
    // Cloud info
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_get_cloud_info() {
        let api = Arc::new(FakeApi::new());
        seed_inventory(&api);
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let info = driver.get_cloud_info().await.unwrap();

        assert_eq!(info.availability_zones.len(), 1);
        assert_eq!(info.keypairs.len(), 2);
        assert_eq!(info.keypairs[0].name, "");
        assert_eq!(info.networks.len(), 1);
        assert_eq!(info.networks[0].subnets[0].gateway.as_deref(), Some("10.0.0.1"));
        assert_eq!(info.security_groups.len(), 1);
        assert_eq!(info.quota.ports, QuotaUsage::new(1, 50));
        assert!(info.quota.cores.is_unlimited());
    }

    #[tokio::test]
    async fn test_get_cloud_info_fails_fast() {
        let api = Arc::new(FakeApi::new());
        seed_inventory(&api);
        api.fail("list_flavors", 500);
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        assert_matches!(
            driver.get_cloud_info().await,
            Err(Error::ServerError { code: 500, .. })
        );
    }

    #[tokio::test]
    async fn test_get_cloud_info_quota_fallback() {
        let api = Arc::new(FakeApi::new());
        seed_inventory(&api);
        {
            let mut state = api.state.lock();
            state.compute_quota.cores = QuotaDetail {
                limit: 10,
                reserved: 0,
                in_use: 2,
            };
        }
        api.fail("volume_quota", 403);
        api.fail("network_quota", 403);
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let info = driver.get_cloud_info().await.unwrap();

        assert_eq!(info.quota.cores, QuotaUsage::new(2, 10));
        assert!(info.quota.gigabytes.is_unlimited());
        assert!(info.quota.ports.is_unlimited());
    }

    #[tokio::test]
    async fn test_get_cloud_info_legacy_networks() {
        let api = Arc::new(FakeApi::new());
        seed_inventory(&api);
        {
            let mut state = api.state.lock();
            state.advanced = false;
            state.legacy_networks = vec![WireLegacyNetwork {
                id: "legacy-1".into(),
                label: Some("flat".into()),
                cidr: Some("192.168.0.0/24".into()),
                ..Default::default()
            }];
        }
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let info = driver.get_cloud_info().await.unwrap();

        assert_eq!(info.networks.len(), 1);
        assert_eq!(info.networks[0].name, "flat");
        assert_eq!(info.networks[0].network_type, NetworkType::Fixed);
        assert_eq!(api.calls("list_subnets"), 0);
        assert_eq!(api.calls("list_ports"), 0);
        // compute security groups are trusted as scoped
        assert_eq!(info.security_groups.len(), 2);
    }

    #[tokio::test]
    async fn test_get_cloud_quota() {
        let api = Arc::new(FakeApi::new());
        api.state.lock().volume_quota.gigabytes = VolumeQuotaDetail {
            limit: 1000,
            reserved: 0,
            in_use: 10,
        };
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let quota = driver.get_cloud_quota().await.unwrap();
        assert_eq!(quota.total_capacity, 1000);
        assert_eq!(quota.volumes_max_num, 20);
    }

    // -------------------------------------------------------------------------
    // Placement and quota
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_check_instance_params() {
        let api = Arc::new(FakeApi::new());
        seed_inventory(&api);
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let mut instance = migration(&[], None);
        instance.placement.security_groups = vec!["sg-1".into()];
        instance.placement.keypair = Some("ops".into());
        let resolved = driver.check_instance_params(&instance).await.unwrap();
        assert_eq!(resolved.flavor.vcpus, 2);
        assert_eq!(resolved.security_groups[0].name, "default");

        instance.placement.flavor = "f-huge".into();
        assert_matches!(
            driver.check_instance_params(&instance).await,
            Err(Error::Validation(ref msg)) if msg.contains("f-huge")
        );

        let mut instance = migration(&[], None);
        instance.placement.security_groups = vec!["sg-9".into()];
        assert_matches!(
            driver.check_instance_params(&instance).await,
            Err(Error::Validation(_))
        );
    }

    #[tokio::test]
    async fn test_check_quota_counts_refetched_snapshots() {
        let api = Arc::new(FakeApi::new());
        seed_inventory(&api);
        api.add_snapshot("snap-1", "vol-src", 30);
        api.state.lock().volume_quota.gigabytes = VolumeQuotaDetail {
            limit: 100,
            reserved: 0,
            in_use: 80,
        };
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let instance = migration(&["snap-1", "snap-gone"], None);
        let resolved = driver.check_instance_params(&instance).await.unwrap();
        assert_matches!(
            driver.check_quota(&instance, &resolved).await,
            Err(Error::QuotaExceeded { ref resource, used: 80, total: 100, needed: 30 }) if resource == "gigabytes"
        );

        api.add_snapshot("snap-1", "vol-src", 20);
        driver.check_quota(&instance, &resolved).await.unwrap();
    }

    #[tokio::test]
    async fn test_check_quota_ports_full() {
        let api = Arc::new(FakeApi::new());
        seed_inventory(&api);
        api.state.lock().network_quota = NetworkQuota { port: 1 };
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let instance = migration(&[], None);
        let resolved = driver.check_instance_params(&instance).await.unwrap();
        assert_matches!(
            driver.check_quota(&instance, &resolved).await,
            Err(Error::QuotaExceeded { ref resource, .. }) if resource == "ports"
        );
    }

    #[tokio::test]
    async fn test_check_ip_addr_is_advisory() {
        let api = Arc::new(FakeApi::new());
        seed_inventory(&api);
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        assert_eq!(
            driver.check_ip_addr(&migration(&[], Some("10.0.0.5"))).await,
            IpAddrStatus::InUse
        );
        assert_eq!(
            driver.check_ip_addr(&migration(&[], Some("10.0.0.6"))).await,
            IpAddrStatus::Available
        );
        assert_eq!(driver.check_ip_addr(&migration(&[], None)).await, IpAddrStatus::Unknown);

        api.fail("list_ports", 500);
        assert_eq!(
            driver.check_ip_addr(&migration(&[], Some("10.0.0.5"))).await,
            IpAddrStatus::Unknown
        );
    }

    // -------------------------------------------------------------------------
    // Instances
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_create_instance_from_list_shaped_response() {
        let api = Arc::new(FakeApi::new());
        seed_inventory(&api);
        api.add_volume("boot", "available", 20);
        api.add_volume("data", "available", 50);
        api.state.lock().list_shaped_boot = true;
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let boot = driver.get_volume("boot").await.unwrap().unwrap();
        let data = driver.get_volume("data").await.unwrap().unwrap();
        let mut instance = migration(&[], Some("10.0.0.9"));
        instance.placement.security_groups = vec!["sg-1".into()];
        instance.placement.keypair = Some(String::new());

        let created = driver
            .create_instance(&boot, &[data], &instance.placement, &instance.source_extra)
            .await
            .unwrap();

        assert_eq!(created.state, "ACTIVE");
        let state = api.state.lock();
        assert_eq!(state.volumes["boot"].wire.bootable.as_deref(), Some("true"));
        let server = &state.created_servers[0].server;
        assert!(server.name.starts_with("RECOVER:"));
        assert_eq!(server.block_device_mapping_v2[0].boot_index, 0);
        assert_eq!(server.block_device_mapping_v2[1].boot_index, 1);
        assert_eq!(server.block_device_mapping_v2[1].volume_size, 50);
        assert_eq!(server.security_groups[0].name, "default");
        assert_eq!(server.networks[0].fixed_ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(server.metadata["os_type"], "LINUX");
        assert_eq!(server.key_name, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_instance_failure_cleans_up() {
        let api = Arc::new(FakeApi::new());
        api.add_volume("boot", "available", 20);
        api.state.lock().boot_script = ["BUILD", "ERROR"].iter().map(|s| s.to_string()).collect();
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let boot = driver.get_volume("boot").await.unwrap().unwrap();
        let instance = migration(&[], None);
        let result = driver
            .create_instance(&boot, &[], &instance.placement, &instance.source_extra)
            .await;

        assert_matches!(result, Err(Error::BackendOperation { ref reason, .. }) if reason.contains("ERROR"));
        assert_eq!(api.calls("delete_server"), 1);
        assert!(api.state.lock().servers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_instance_many_servers_cleans_up() {
        let api = Arc::new(FakeApi::new());
        api.add_volume("boot", "available", 20);
        {
            let mut state = api.state.lock();
            state.list_shaped_boot = true;
            state.extra_boot_servers = 2;
        }
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let boot = driver.get_volume("boot").await.unwrap().unwrap();
        let instance = migration(&[], None);
        let result = driver
            .create_instance(&boot, &[], &instance.placement, &instance.source_extra)
            .await;

        assert_matches!(result, Err(Error::BackendOperation { ref reason, .. }) if reason.contains("3 servers"));
        assert_eq!(api.calls("delete_server"), 3);
        assert!(api.state.lock().servers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_deleted_instance_is_gone() {
        let api = Arc::new(FakeApi::new());
        api.state.lock().servers.insert(
            "srv-old".into(),
            FakeServer {
                wire: WireServer {
                    id: "srv-old".into(),
                    status: "SOFT_DELETED".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        assert!(driver.get_instance("srv-old").await.unwrap().is_none());
        driver.delete_instance("srv-old").await.unwrap();
        assert_eq!(api.calls("delete_server"), 0);
    }

    #[tokio::test]
    async fn test_check_register_matches_mac() {
        let api = Arc::new(FakeApi::new());
        let mut addresses = BTreeMap::new();
        addresses.insert(
            "private".to_string(),
            vec![WireAddress {
                addr: "10.0.0.7".into(),
                ip_type: Some("fixed".into()),
                mac_addr: Some("fa:16:3e:00:00:01".into()),
            }],
        );
        api.state.lock().servers.insert(
            "srv-self".into(),
            FakeServer {
                wire: WireServer {
                    id: "srv-self".into(),
                    status: "ACTIVE".into(),
                    addresses,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        let node = driver.check_register().await.unwrap();
        assert_eq!(node.node_id, "srv-self");
        assert_eq!(node.node_mac_addr, "fa:16:3e:00:00:01");
        assert_eq!(node.external_ip.as_deref(), Some("10.0.0.7"));
    }

    #[tokio::test]
    async fn test_check_register_not_found() {
        let api = Arc::new(FakeApi::new());
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        assert_matches!(driver.check_register().await, Err(Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_check_cloud_env() {
        let api = Arc::new(FakeApi::new());
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        driver.check_cloud_env().await.unwrap();

        api.state.lock().volume_quota.volumes = VolumeQuotaDetail {
            limit: 10,
            reserved: 0,
            in_use: 10,
        };
        assert_matches!(
            driver.check_cloud_env().await,
            Err(Error::QuotaExceeded { .. })
        );
    }

    #[tokio::test]
    async fn test_check_cloud_apis_lists_images_when_cataloged() {
        let api = Arc::new(FakeApi::new());
        let dev = TempDir::new().unwrap();
        let driver = driver(&api, dev.path());

        driver.check_cloud_apis().await.unwrap();
        assert_eq!(api.calls("list_images"), 0);

        api.state.lock().image_service = true;
        driver.check_cloud_apis().await.unwrap();
        assert_eq!(api.calls("list_images"), 1);

        api.fail("list_images", 503);
        assert_matches!(
            driver.check_cloud_apis().await,
            Err(Error::ServerError { code: 503, .. })
        );
    }
}
