//! OpenStack REST client
//!
//! [`OpenStackApi`] is the typed request surface the driver is written
//! against. [`OpenStackClient`] implements it over HTTP, owning the
//! Keystone session and re-authenticating once when a token is rejected.

use super::session::{AuthVersion, CatalogConfig, Service, SessionState, SUBJECT_TOKEN_HEADER};
use super::wire::*;
use crate::cloud::http::{HttpClient, HttpConfig, HttpResponse};
use crate::domain::ports::{CloudCredential, SessionInfo};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

// =============================================================================
// API Port
// =============================================================================

/// Typed OpenStack API calls used by the driver.
///
/// Missing resources surface as [`Error::NotFound`].
#[async_trait]
pub trait OpenStackApi: Send + Sync {
    /// Discard any session and authenticate again
    async fn authenticate(&self) -> Result<SessionInfo>;

    /// Current session, authenticating first if there is none
    async fn session_info(&self) -> Result<SessionInfo>;

    // Compute
    async fn list_servers(&self) -> Result<Vec<WireServer>>;
    async fn get_server(&self, server_id: &str) -> Result<WireServer>;
    async fn create_server(&self, request: &CreateServerRequest) -> Result<CreatedServer>;
    async fn delete_server(&self, server_id: &str) -> Result<()>;
    async fn attach_volume(&self, server_id: &str, volume_id: &str) -> Result<()>;
    async fn detach_volume(&self, server_id: &str, volume_id: &str) -> Result<()>;
    async fn list_availability_zones(&self) -> Result<Vec<WireAvailabilityZone>>;
    async fn list_flavors(&self) -> Result<Vec<WireFlavor>>;
    async fn list_keypairs(&self) -> Result<Vec<WireKeypair>>;
    async fn list_legacy_networks(&self) -> Result<Vec<WireLegacyNetwork>>;
    async fn list_compute_security_groups(&self) -> Result<Vec<WireSecurityGroup>>;
    async fn compute_quota(&self) -> Result<ComputeQuotaSet>;

    // Volume
    async fn get_volume(&self, volume_id: &str) -> Result<WireVolume>;
    async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<WireVolume>;
    async fn delete_volume(&self, volume_id: &str) -> Result<()>;
    async fn set_bootable(&self, volume_id: &str) -> Result<()>;
    async fn get_snapshot(&self, snapshot_id: &str) -> Result<WireSnapshot>;
    async fn create_snapshot(&self, request: &CreateSnapshotRequest) -> Result<WireSnapshot>;
    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;
    async fn list_volume_types(&self) -> Result<Vec<WireVolumeType>>;
    async fn volume_quota(&self) -> Result<VolumeQuotaSet>;

    // Image
    async fn list_images(&self, limit: usize) -> Result<Vec<WireImage>>;

    // Network
    async fn list_networks(&self) -> Result<Vec<WireNetwork>>;
    async fn list_subnets(&self) -> Result<Vec<WireSubnet>>;
    async fn list_ports(&self, network_id: Option<&str>) -> Result<Vec<WirePort>>;
    async fn list_security_groups(&self) -> Result<Vec<WireSecurityGroup>>;
    async fn network_quota(&self) -> Result<NetworkQuota>;
}

pub type OpenStackApiRef = Arc<dyn OpenStackApi>;

// =============================================================================
// HTTP Implementation
// =============================================================================

pub struct OpenStackClient {
    credential: CloudCredential,
    version: AuthVersion,
    catalog: CatalogConfig,
    http: HttpClient,
    session: RwLock<Option<Arc<SessionState>>>,
}

impl OpenStackClient {
    /// Create a client; no request is sent until the first call
    pub fn new(credential: CloudCredential, catalog: CatalogConfig, http: &HttpConfig) -> Result<Self> {
        let version = AuthVersion::from_auth_url(&credential.auth_url)?;
        Ok(Self {
            credential,
            version,
            catalog,
            http: HttpClient::new(http)?,
            session: RwLock::new(None),
        })
    }

    /// Password authentication against Keystone
    async fn login(&self) -> Result<Arc<SessionState>> {
        info!(
            "Authenticating user {} to project {} at {}",
            self.credential.username, self.credential.project_name, self.credential.auth_url
        );
        let body = self.version.auth_body(&self.credential);
        let resp = self
            .http
            .post(&self.credential.auth_url, self.version.token_action(), None, &body)
            .await
            .map_err(|e| match e {
                Error::Unauthorized(msg) => Error::Authentication(format!(
                    "Credentials rejected, check username/password/project: {}",
                    msg
                )),
                Error::Http(e) if e.is_connect() => Error::Authentication(format!(
                    "Cannot connect to auth url {}: {}",
                    self.credential.auth_url, e
                )),
                other => other,
            })?;

        let token_header = resp.header(SUBJECT_TOKEN_HEADER).map(str::to_owned);
        let session = SessionState::from_auth_response(
            self.version,
            token_header.as_deref(),
            resp.body,
            &self.credential.region,
            &self.catalog,
        )?;
        let session = Arc::new(session);
        *self.session.write() = Some(session.clone());
        Ok(session)
    }

    async fn session(&self) -> Result<Arc<SessionState>> {
        let current = self.session.read().clone();
        match current {
            Some(session) => Ok(session),
            None => self.login().await,
        }
    }

    fn invalidate(&self) {
        *self.session.write() = None;
    }

    /// Send a request, re-authenticating and retrying once on 401
    async fn send(
        &self,
        service: Service,
        method: Method,
        action: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse> {
        let session = self.session().await?;
        let base = session.endpoint(service)?;
        match self
            .http
            .request(method.clone(), base, action, Some(&session.token), body)
            .await
        {
            Err(e) if e.is_unauthorized() => {
                warn!("Token rejected on {} {}, re-authenticating", method, action);
                self.invalidate();
                let session = self.login().await?;
                let base = session.endpoint(service)?;
                self.http
                    .request(method, base, action, Some(&session.token), body)
                    .await
            }
            other => other,
        }
    }

    async fn get<T: DeserializeOwned>(&self, service: Service, action: &str) -> Result<T> {
        let resp = self.send(service, Method::GET, action, None).await?;
        decode(resp.body, action)
    }

    async fn post<T: DeserializeOwned>(&self, service: Service, action: &str, body: &Value) -> Result<T> {
        let resp = self.send(service, Method::POST, action, Some(body)).await?;
        decode(resp.body, action)
    }

    async fn post_no_content(&self, service: Service, action: &str, body: &Value) -> Result<()> {
        self.send(service, Method::POST, action, Some(body)).await?;
        Ok(())
    }

    async fn delete(&self, service: Service, action: &str) -> Result<()> {
        self.send(service, Method::DELETE, action, None).await?;
        Ok(())
    }

    async fn project_id(&self) -> Result<String> {
        Ok(self.session().await?.project_id.clone())
    }
}

fn decode<T: DeserializeOwned>(body: Value, action: &str) -> Result<T> {
    serde_json::from_value(body).map_err(|e| {
        error!("Unexpected response body for {}: {}", action, e);
        Error::JsonParse(e)
    })
}

fn path(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

#[async_trait]
impl OpenStackApi for OpenStackClient {
    async fn authenticate(&self) -> Result<SessionInfo> {
        self.invalidate();
        Ok(self.login().await?.info())
    }

    async fn session_info(&self) -> Result<SessionInfo> {
        Ok(self.session().await?.info())
    }

    async fn list_servers(&self) -> Result<Vec<WireServer>> {
        let list: ServerList = self.get(Service::Compute, "/servers/detail").await?;
        Ok(list.servers)
    }

    async fn get_server(&self, server_id: &str) -> Result<WireServer> {
        let action = format!("/servers/{}", path(server_id));
        let env: ServerEnvelope = self.get(Service::Compute, &action).await?;
        Ok(env.server)
    }

    async fn create_server(&self, request: &CreateServerRequest) -> Result<CreatedServer> {
        let body = serde_json::to_value(request)?;
        let env: CreatedServerEnvelope = self.post(Service::Compute, "/os-volumes_boot", &body).await?;
        Ok(env.server)
    }

    async fn delete_server(&self, server_id: &str) -> Result<()> {
        self.delete(Service::Compute, &format!("/servers/{}", path(server_id)))
            .await
    }

    async fn attach_volume(&self, server_id: &str, volume_id: &str) -> Result<()> {
        let body = serde_json::to_value(AttachRequest {
            volume_attachment: VolumeIdRef { volume_id },
        })?;
        let action = format!("servers/{}/os-volume_attachments", path(server_id));
        self.post_no_content(Service::Compute, &action, &body).await
    }

    async fn detach_volume(&self, server_id: &str, volume_id: &str) -> Result<()> {
        let action = format!(
            "servers/{}/os-volume_attachments/{}",
            path(server_id),
            path(volume_id)
        );
        self.delete(Service::Compute, &action).await
    }

    async fn list_availability_zones(&self) -> Result<Vec<WireAvailabilityZone>> {
        let list: AvailabilityZoneList = self.get(Service::Compute, "/os-availability-zone").await?;
        Ok(list.zones)
    }

    async fn list_flavors(&self) -> Result<Vec<WireFlavor>> {
        let list: FlavorList = self.get(Service::Compute, "/flavors/detail").await?;
        Ok(list.flavors)
    }

    async fn list_keypairs(&self) -> Result<Vec<WireKeypair>> {
        let list: KeypairList = self.get(Service::Compute, "/os-keypairs").await?;
        Ok(list.keypairs)
    }

    async fn list_legacy_networks(&self) -> Result<Vec<WireLegacyNetwork>> {
        let list: LegacyNetworkList = self.get(Service::Compute, "/os-networks").await?;
        Ok(list.networks)
    }

    async fn list_compute_security_groups(&self) -> Result<Vec<WireSecurityGroup>> {
        let list: SecurityGroupList = self.get(Service::Compute, "/os-security-groups").await?;
        Ok(list.security_groups)
    }

    async fn compute_quota(&self) -> Result<ComputeQuotaSet> {
        let action = format!("/os-quota-sets/{}/detail", path(&self.project_id().await?));
        let env: ComputeQuotaEnvelope = self.get(Service::Compute, &action).await?;
        Ok(env.quota_set)
    }

    async fn get_volume(&self, volume_id: &str) -> Result<WireVolume> {
        let action = format!("/volumes/{}", path(volume_id));
        let env: VolumeEnvelope = self.get(Service::Volume, &action).await?;
        Ok(env.volume)
    }

    async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<WireVolume> {
        let body = serde_json::to_value(request)?;
        let env: VolumeEnvelope = self.post(Service::Volume, "/volumes", &body).await?;
        Ok(env.volume)
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.delete(Service::Volume, &format!("/volumes/{}", path(volume_id)))
            .await
    }

    async fn set_bootable(&self, volume_id: &str) -> Result<()> {
        let body = json!({"os-set_bootable": {"bootable": true}});
        let action = format!("volumes/{}/action", path(volume_id));
        self.post_no_content(Service::Volume, &action, &body).await
    }

    async fn get_snapshot(&self, snapshot_id: &str) -> Result<WireSnapshot> {
        let action = format!("/snapshots/{}", path(snapshot_id));
        let env: SnapshotEnvelope = self.get(Service::Volume, &action).await?;
        Ok(env.snapshot)
    }

    async fn create_snapshot(&self, request: &CreateSnapshotRequest) -> Result<WireSnapshot> {
        let body = serde_json::to_value(request)?;
        let env: SnapshotEnvelope = self.post(Service::Volume, "/snapshots", &body).await?;
        Ok(env.snapshot)
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.delete(Service::Volume, &format!("/snapshots/{}", path(snapshot_id)))
            .await
    }

    async fn list_volume_types(&self) -> Result<Vec<WireVolumeType>> {
        let list: VolumeTypeList = self.get(Service::Volume, "/types").await?;
        Ok(list.volume_types)
    }

    async fn volume_quota(&self) -> Result<VolumeQuotaSet> {
        let action = format!("/os-quota-sets/{}?usage=true", path(&self.project_id().await?));
        let env: VolumeQuotaEnvelope = self.get(Service::Volume, &action).await?;
        Ok(env.quota_set)
    }

    async fn list_images(&self, limit: usize) -> Result<Vec<WireImage>> {
        let list: ImageList = self.get(Service::Image, &format!("/images?limit={}", limit)).await?;
        Ok(list.images)
    }

    async fn list_networks(&self) -> Result<Vec<WireNetwork>> {
        let list: NetworkList = self.get(Service::Network, "/networks").await?;
        Ok(list.networks)
    }

    async fn list_subnets(&self) -> Result<Vec<WireSubnet>> {
        let list: SubnetList = self.get(Service::Network, "/subnets").await?;
        Ok(list.subnets)
    }

    async fn list_ports(&self, network_id: Option<&str>) -> Result<Vec<WirePort>> {
        let action = match network_id {
            Some(id) => format!("/ports?network_id={}", path(id)),
            None => "/ports".to_string(),
        };
        let list: PortList = self.get(Service::Network, &action).await?;
        Ok(list.ports)
    }

    async fn list_security_groups(&self) -> Result<Vec<WireSecurityGroup>> {
        let list: SecurityGroupList = self.get(Service::Network, "/security-groups").await?;
        Ok(list.security_groups)
    }

    async fn network_quota(&self) -> Result<NetworkQuota> {
        let action = format!("/quotas/{}", path(&self.project_id().await?));
        let env: NetworkQuotaEnvelope = self.get(Service::Network, &action).await?;
        Ok(env.quota)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    // `assert_matches!` prints the matched value on failure
    impl std::fmt::Debug for OpenStackClient {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("OpenStackClient").finish_non_exhaustive()
        }
    }

    fn credential(auth_url: &str) -> CloudCredential {
        CloudCredential {
            cloud_type: crate::domain::ports::CloudType::OpenStack,
            auth_url: auth_url.to_string(),
            username: "admin".into(),
            password: "secret".into(),
            project_name: "demo".into(),
            domain_name: "default".into(),
            region: "RegionOne".into(),
            node_id: None,
            volume_availability_zone: None,
        }
    }

    #[test]
    fn test_client_rejects_unknown_auth_version() {
        let result = OpenStackClient::new(
            credential("http://keystone:5000/v1"),
            CatalogConfig::default(),
            &HttpConfig::default(),
        );
        assert_matches!(result, Err(Error::Configuration(_)));
    }

    #[test]
    fn test_client_starts_without_session() {
        let client = OpenStackClient::new(
            credential("http://keystone:5000/v3"),
            CatalogConfig::default(),
            &HttpConfig::default(),
        )
        .unwrap();
        assert!(client.session.read().is_none());
        assert_eq!(path("a b/c"), "a%20b%2Fc");
    }
}
