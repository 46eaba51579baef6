//! In-memory OpenStack API for driver tests

use super::client::OpenStackApi;
use super::wire::*;
use crate::cloud::http::classify_status;
use reqwest::StatusCode;
use crate::domain::ports::SessionInfo;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct FakeVolume {
    pub wire: WireVolume,
    /// Statuses reported by successive reads, last one sticks
    pub script: VecDeque<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    pub wire: WireServer,
    pub script: VecDeque<String>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub advanced: bool,
    pub project_id: String,
    pub volumes: BTreeMap<String, FakeVolume>,
    pub snapshots: BTreeMap<String, WireSnapshot>,
    pub servers: BTreeMap<String, FakeServer>,
    pub zones: Vec<WireAvailabilityZone>,
    pub flavors: Vec<WireFlavor>,
    pub keypairs: Vec<String>,
    pub networks: Vec<WireNetwork>,
    pub legacy_networks: Vec<WireLegacyNetwork>,
    pub subnets: Vec<WireSubnet>,
    pub ports: Vec<WirePort>,
    pub security_groups: Vec<WireSecurityGroup>,
    pub volume_types: Vec<WireVolumeType>,
    /// Whether the catalog lists an image endpoint
    pub image_service: bool,
    pub images: Vec<WireImage>,
    pub compute_quota: ComputeQuotaSet,
    pub volume_quota: VolumeQuotaSet,
    pub network_quota: NetworkQuota,
    /// Statuses a newly created volume reports
    pub create_volume_script: VecDeque<String>,
    /// Statuses a newly booted server reports
    pub boot_script: VecDeque<String>,
    /// Return the boot response as a list
    pub list_shaped_boot: bool,
    /// Servers each list-shaped boot creates beyond the first
    pub extra_boot_servers: usize,
    /// Method name -> HTTP status it fails with
    pub failures: BTreeMap<&'static str, u16>,
    pub calls: BTreeMap<&'static str, usize>,
    pub created_volumes: Vec<CreateVolumeRequest>,
    pub created_servers: Vec<CreateServerRequest>,
    next_id: usize,
}

pub struct FakeApi {
    pub state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new() -> Self {
        let unlimited = QuotaDetail {
            limit: -1,
            reserved: 0,
            in_use: 0,
        };
        let unlimited_volume = VolumeQuotaDetail {
            limit: -1,
            reserved: 0,
            in_use: 0,
        };
        let state = FakeState {
            advanced: true,
            project_id: "proj-1".into(),
            compute_quota: ComputeQuotaSet {
                cores: unlimited,
                ram: unlimited,
                instances: unlimited,
                fixed_ips: Some(unlimited),
            },
            volume_quota: VolumeQuotaSet {
                volumes: unlimited_volume,
                gigabytes: unlimited_volume,
                snapshots: unlimited_volume,
            },
            network_quota: NetworkQuota { port: -1 },
            create_volume_script: ["creating", "available"].iter().map(|s| s.to_string()).collect(),
            boot_script: ["BUILD", "ACTIVE"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    pub fn fail(&self, method: &'static str, code: u16) {
        self.state.lock().failures.insert(method, code);
    }

    pub fn add_volume(&self, id: &str, status: &str, size: u64) {
        self.state.lock().volumes.insert(
            id.to_string(),
            FakeVolume {
                wire: WireVolume {
                    id: id.to_string(),
                    name: Some(format!("{}-name", id)),
                    status: status.to_string(),
                    size,
                    volume_type: Some("ssd".into()),
                    availability_zone: Some("nova".into()),
                    bootable: Some("false".into()),
                },
                script: VecDeque::new(),
            },
        );
    }

    pub fn add_snapshot(&self, id: &str, volume_id: &str, size: u64) {
        self.state.lock().snapshots.insert(
            id.to_string(),
            WireSnapshot {
                id: id.to_string(),
                name: Some(format!("{}-name", id)),
                status: "available".into(),
                size,
                volume_id: Some(volume_id.to_string()),
            },
        );
    }

    /// Record the call and fail if configured to
    fn hit(&self, method: &'static str) -> Result<()> {
        let mut state = self.state.lock();
        *state.calls.entry(method).or_insert(0) += 1;
        match state.failures.get(method) {
            Some(code) => {
                let status = StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                Err(classify_status(status, method, "injected failure".into()))
            }
            None => Ok(()),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }
}

fn not_found(kind: &str, id: &str) -> Error {
    Error::NotFound {
        kind: kind.into(),
        id: id.into(),
    }
}

#[async_trait]
impl OpenStackApi for FakeApi {
    async fn authenticate(&self) -> Result<SessionInfo> {
        self.hit("authenticate")?;
        self.session_info().await
    }

    async fn session_info(&self) -> Result<SessionInfo> {
        let state = self.state.lock();
        let mut endpoints = BTreeMap::new();
        if state.image_service {
            endpoints.insert("image".to_string(), "http://glance/v2".to_string());
        }
        Ok(SessionInfo {
            project_id: state.project_id.clone(),
            endpoints,
            advanced_networking: state.advanced,
        })
    }

    async fn list_servers(&self) -> Result<Vec<WireServer>> {
        self.hit("list_servers")?;
        Ok(self.state.lock().servers.values().map(|s| s.wire.clone()).collect())
    }

    async fn get_server(&self, server_id: &str) -> Result<WireServer> {
        self.hit("get_server")?;
        let mut state = self.state.lock();
        let server = state
            .servers
            .get_mut(server_id)
            .ok_or_else(|| not_found("server", server_id))?;
        if let Some(status) = server.script.pop_front() {
            server.wire.status = status;
        }
        Ok(server.wire.clone())
    }

    async fn create_server(&self, request: &CreateServerRequest) -> Result<CreatedServer> {
        self.hit("create_server")?;
        let (list_shaped, count) = {
            let state = self.state.lock();
            (state.list_shaped_boot, 1 + state.extra_boot_servers)
        };
        let ids: Vec<String> = (0..count).map(|_| self.next_id("srv")).collect();

        let mut state = self.state.lock();
        state.created_servers.push(request.clone());
        let script = state.boot_script.clone();
        for id in &ids {
            state.servers.insert(
                id.clone(),
                FakeServer {
                    wire: WireServer {
                        id: id.clone(),
                        name: request.server.name.clone(),
                        status: "BUILD".into(),
                        ..Default::default()
                    },
                    script: script.clone(),
                },
            );
        }
        let mut created: Vec<IdOnly> = ids.into_iter().map(|id| IdOnly { id }).collect();
        Ok(if list_shaped {
            CreatedServer::Many(created)
        } else {
            CreatedServer::One(created.remove(0))
        })
    }

    async fn delete_server(&self, server_id: &str) -> Result<()> {
        self.hit("delete_server")?;
        self.state
            .lock()
            .servers
            .remove(server_id)
            .map(|_| ())
            .ok_or_else(|| not_found("server", server_id))
    }

    async fn attach_volume(&self, _server_id: &str, volume_id: &str) -> Result<()> {
        self.hit("attach_volume")?;
        let mut state = self.state.lock();
        let vol = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| not_found("volume", volume_id))?;
        vol.wire.status = "in-use".into();
        Ok(())
    }

    async fn detach_volume(&self, _server_id: &str, volume_id: &str) -> Result<()> {
        self.hit("detach_volume")?;
        let mut state = self.state.lock();
        let vol = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| not_found("volume", volume_id))?;
        vol.wire.status = "available".into();
        Ok(())
    }

    async fn list_availability_zones(&self) -> Result<Vec<WireAvailabilityZone>> {
        self.hit("list_availability_zones")?;
        Ok(self.state.lock().zones.clone())
    }

    async fn list_flavors(&self) -> Result<Vec<WireFlavor>> {
        self.hit("list_flavors")?;
        Ok(self.state.lock().flavors.clone())
    }

    async fn list_keypairs(&self) -> Result<Vec<WireKeypair>> {
        self.hit("list_keypairs")?;
        Ok(self
            .state
            .lock()
            .keypairs
            .iter()
            .map(|name| WireKeypair {
                keypair: NameRef { name: name.clone() },
            })
            .collect())
    }

    async fn list_legacy_networks(&self) -> Result<Vec<WireLegacyNetwork>> {
        self.hit("list_legacy_networks")?;
        Ok(self.state.lock().legacy_networks.clone())
    }

    async fn list_compute_security_groups(&self) -> Result<Vec<WireSecurityGroup>> {
        self.hit("list_compute_security_groups")?;
        Ok(self.state.lock().security_groups.clone())
    }

    async fn compute_quota(&self) -> Result<ComputeQuotaSet> {
        self.hit("compute_quota")?;
        Ok(self.state.lock().compute_quota)
    }

    async fn get_volume(&self, volume_id: &str) -> Result<WireVolume> {
        self.hit("get_volume")?;
        let mut state = self.state.lock();
        let vol = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| not_found("volume", volume_id))?;
        if let Some(status) = vol.script.pop_front() {
            vol.wire.status = status;
        }
        Ok(vol.wire.clone())
    }

    async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<WireVolume> {
        self.hit("create_volume")?;
        let id = self.next_id("vol");
        let mut state = self.state.lock();
        state.created_volumes.push(request.clone());
        let wire = WireVolume {
            id: id.clone(),
            name: Some(request.volume.name.clone()),
            status: "creating".into(),
            size: request.volume.size,
            volume_type: request.volume.volume_type.clone(),
            availability_zone: request.volume.availability_zone.clone(),
            bootable: Some("false".into()),
        };
        let script = state.create_volume_script.clone();
        state.volumes.insert(
            id,
            FakeVolume {
                wire: wire.clone(),
                script,
            },
        );
        Ok(wire)
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.hit("delete_volume")?;
        self.state
            .lock()
            .volumes
            .remove(volume_id)
            .map(|_| ())
            .ok_or_else(|| not_found("volume", volume_id))
    }

    async fn set_bootable(&self, volume_id: &str) -> Result<()> {
        self.hit("set_bootable")?;
        let mut state = self.state.lock();
        let vol = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| not_found("volume", volume_id))?;
        vol.wire.bootable = Some("true".into());
        Ok(())
    }

    async fn get_snapshot(&self, snapshot_id: &str) -> Result<WireSnapshot> {
        self.hit("get_snapshot")?;
        self.state
            .lock()
            .snapshots
            .get(snapshot_id)
            .cloned()
            .ok_or_else(|| not_found("snapshot", snapshot_id))
    }

    async fn create_snapshot(&self, request: &CreateSnapshotRequest) -> Result<WireSnapshot> {
        self.hit("create_snapshot")?;
        let id = self.next_id("snap");
        let mut state = self.state.lock();
        let size = state
            .volumes
            .get(&request.snapshot.volume_id)
            .map(|v| v.wire.size)
            .ok_or_else(|| not_found("volume", &request.snapshot.volume_id))?;
        let snap = WireSnapshot {
            id: id.clone(),
            name: Some(request.snapshot.name.clone()),
            status: "available".into(),
            size,
            volume_id: Some(request.snapshot.volume_id.clone()),
        };
        state.snapshots.insert(id, snap.clone());
        Ok(snap)
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.hit("delete_snapshot")?;
        self.state
            .lock()
            .snapshots
            .remove(snapshot_id)
            .map(|_| ())
            .ok_or_else(|| not_found("snapshot", snapshot_id))
    }

    async fn list_volume_types(&self) -> Result<Vec<WireVolumeType>> {
        self.hit("list_volume_types")?;
        Ok(self.state.lock().volume_types.clone())
    }

    async fn volume_quota(&self) -> Result<VolumeQuotaSet> {
        self.hit("volume_quota")?;
        Ok(self.state.lock().volume_quota)
    }

    async fn list_images(&self, limit: usize) -> Result<Vec<WireImage>> {
        self.hit("list_images")?;
        Ok(self.state.lock().images.iter().take(limit).cloned().collect())
    }

    async fn list_networks(&self) -> Result<Vec<WireNetwork>> {
        self.hit("list_networks")?;
        Ok(self.state.lock().networks.clone())
    }

    async fn list_subnets(&self) -> Result<Vec<WireSubnet>> {
        self.hit("list_subnets")?;
        Ok(self.state.lock().subnets.clone())
    }

    async fn list_ports(&self, network_id: Option<&str>) -> Result<Vec<WirePort>> {
        self.hit("list_ports")?;
        Ok(self
            .state
            .lock()
            .ports
            .iter()
            .filter(|p| network_id.map_or(true, |id| p.network_id == id))
            .cloned()
            .collect())
    }

    async fn list_security_groups(&self) -> Result<Vec<WireSecurityGroup>> {
        self.hit("list_security_groups")?;
        Ok(self.state.lock().security_groups.clone())
    }

    async fn network_quota(&self) -> Result<NetworkQuota> {
        self.hit("network_quota")?;
        Ok(self.state.lock().network_quota)
    }
}
