//! Keystone session handling
//!
//! A [`SessionState`] is built from one password authentication against
//! Keystone v2.0 or v3 and replaced wholesale whenever the token is
//! rejected.

use crate::domain::ports::{CloudCredential, SessionInfo};
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Response header carrying the v3 token
pub const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

// =============================================================================
// Catalog Configuration
// =============================================================================

/// Service types looked up in the catalog, with API version suffixes
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub compute_service: String,
    pub volume_service: String,
    pub image_service: String,
    pub network_service: String,
    pub image_version: String,
    pub network_version: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            compute_service: "compute".to_string(),
            volume_service: "volumev2".to_string(),
            image_service: "image".to_string(),
            network_service: "network".to_string(),
            image_version: "v2".to_string(),
            network_version: "v2.0".to_string(),
        }
    }
}

// =============================================================================
// Auth Version
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthVersion {
    V2,
    V3,
}

impl AuthVersion {
    /// Parse the version from the auth URL's last path segment
    pub fn from_auth_url(auth_url: &str) -> Result<Self> {
        let version = auth_url.trim_end_matches('/').rsplit('/').next().unwrap_or("");
        match version {
            "v2.0" => Ok(AuthVersion::V2),
            "v3" => Ok(AuthVersion::V3),
            other => Err(Error::Configuration(format!(
                "Auth version {:?} is not supported, expected an auth url like \
                 http://<host>:5000/v2.0 or http://<host>:5000/v3",
                other
            ))),
        }
    }

    /// Path of the token endpoint relative to the auth URL
    pub fn token_action(&self) -> &'static str {
        match self {
            AuthVersion::V2 => "/tokens",
            AuthVersion::V3 => "/auth/tokens",
        }
    }

    /// Password authentication request body
    pub fn auth_body(&self, credential: &CloudCredential) -> Value {
        match self {
            AuthVersion::V2 => json!({
                "auth": {
                    "passwordCredentials": {
                        "username": credential.username,
                        "password": credential.password,
                    },
                    "tenantName": credential.project_name,
                }
            }),
            AuthVersion::V3 => json!({
                "auth": {
                    "identity": {
                        "methods": ["password"],
                        "password": {
                            "user": {
                                "domain": {"id": credential.domain_name},
                                "name": credential.username,
                                "password": credential.password,
                            }
                        }
                    },
                    "scope": {
                        "project": {
                            "domain": {"id": credential.domain_name},
                            "name": credential.project_name,
                        }
                    }
                }
            }),
        }
    }
}

// =============================================================================
// Keystone Response Shapes
// =============================================================================

#[derive(Debug, Deserialize)]
struct V2Response {
    access: V2Access,
}

#[derive(Debug, Deserialize)]
struct V2Access {
    token: V2Token,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<V2Service>,
}

#[derive(Debug, Deserialize)]
struct V2Token {
    id: String,
    tenant: IdRef,
}

#[derive(Debug, Deserialize)]
struct V2Service {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<V2Endpoint>,
}

#[derive(Debug, Deserialize)]
struct V2Endpoint {
    #[serde(default)]
    region: Option<String>,
    #[serde(rename = "publicURL", default)]
    public_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct V3Response {
    token: V3Token,
}

#[derive(Debug, Deserialize)]
struct V3Token {
    project: IdRef,
    #[serde(default)]
    catalog: Vec<V3Service>,
}

#[derive(Debug, Deserialize)]
struct V3Service {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<V3Endpoint>,
}

#[derive(Debug, Deserialize)]
struct V3Endpoint {
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    interface: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

// =============================================================================
// Session State
// =============================================================================

/// Which service a request goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Compute,
    Volume,
    Image,
    Network,
}

/// Authenticated session: token, project and per-service base URLs
#[derive(Clone, PartialEq, Eq)]
pub struct SessionState {
    pub token: String,
    pub project_id: String,
    pub compute_url: String,
    pub volume_url: String,
    pub image_url: Option<String>,
    pub network_url: Option<String>,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("token", &"******")
            .field("project_id", &self.project_id)
            .field("compute_url", &self.compute_url)
            .field("volume_url", &self.volume_url)
            .field("image_url", &self.image_url)
            .field("network_url", &self.network_url)
            .finish()
    }
}

impl SessionState {
    /// Build a session from a Keystone token response
    pub fn from_auth_response(
        version: AuthVersion,
        token_header: Option<&str>,
        body: Value,
        region: &str,
        catalog: &CatalogConfig,
    ) -> Result<Self> {
        let (token, project_id, endpoints) = match version {
            AuthVersion::V2 => {
                let resp: V2Response = serde_json::from_value(body).map_err(|e| {
                    Error::Authentication(format!("Unexpected v2.0 token response: {}", e))
                })?;
                let endpoints = v2_endpoints(&resp.access.service_catalog, region);
                (resp.access.token.id, resp.access.token.tenant.id, endpoints)
            }
            AuthVersion::V3 => {
                let token = token_header.map(str::to_string).ok_or_else(|| {
                    Error::Authentication(format!(
                        "Missing {} header in v3 token response",
                        SUBJECT_TOKEN_HEADER
                    ))
                })?;
                let resp: V3Response = serde_json::from_value(body).map_err(|e| {
                    Error::Authentication(format!("Unexpected v3 token response: {}", e))
                })?;
                let endpoints = v3_endpoints(&resp.token.catalog, region);
                (token, resp.token.project.id, endpoints)
            }
        };

        if token.is_empty() {
            return Err(Error::Authentication("Keystone returned an empty token".into()));
        }

        let compute_url = endpoints
            .get(&catalog.compute_service)
            .cloned()
            .ok_or_else(|| Error::Catalog(format!(
                "No {} endpoint in region {}",
                catalog.compute_service, region
            )))?;
        let volume_url = endpoints
            .get(&catalog.volume_service)
            .cloned()
            .ok_or_else(|| Error::Catalog(format!(
                "No {} endpoint in region {}",
                catalog.volume_service, region
            )))?;
        let image_url = endpoints
            .get(&catalog.image_service)
            .map(|url| format!("{}/{}", url.trim_end_matches('/'), catalog.image_version));
        let network_url = endpoints
            .get(&catalog.network_service)
            .map(|url| format!("{}/{}", url.trim_end_matches('/'), catalog.network_version));

        info!(
            "Authenticated to project {} (advanced networking: {})",
            project_id,
            network_url.is_some()
        );

        Ok(Self {
            token,
            project_id,
            compute_url,
            volume_url,
            image_url,
            network_url,
        })
    }

    /// Advanced networking is available iff the catalog has a network endpoint
    pub fn advanced_networking(&self) -> bool {
        self.network_url.is_some()
    }

    /// Base URL for `service`
    pub fn endpoint(&self, service: Service) -> Result<&str> {
        match service {
            Service::Compute => Ok(&self.compute_url),
            Service::Volume => Ok(&self.volume_url),
            Service::Image => self
                .image_url
                .as_deref()
                .ok_or_else(|| Error::Catalog("No image endpoint".into())),
            Service::Network => self
                .network_url
                .as_deref()
                .ok_or_else(|| Error::Catalog("No network endpoint".into())),
        }
    }

    /// Non-secret view
    pub fn info(&self) -> SessionInfo {
        let mut endpoints = BTreeMap::new();
        endpoints.insert("compute".to_string(), self.compute_url.clone());
        endpoints.insert("volume".to_string(), self.volume_url.clone());
        if let Some(url) = &self.image_url {
            endpoints.insert("image".to_string(), url.clone());
        }
        if let Some(url) = &self.network_url {
            endpoints.insert("network".to_string(), url.clone());
        }
        SessionInfo {
            project_id: self.project_id.clone(),
            endpoints,
            advanced_networking: self.advanced_networking(),
        }
    }
}

fn v2_endpoints(catalog: &[V2Service], region: &str) -> BTreeMap<String, String> {
    let mut endpoints = BTreeMap::new();
    for service in catalog {
        for endpoint in &service.endpoints {
            if endpoint.region.as_deref() != Some(region) {
                debug!("Skipping {} endpoint outside region {}", service.service_type, region);
                continue;
            }
            match &endpoint.public_url {
                Some(url) => {
                    endpoints.insert(service.service_type.clone(), url.clone());
                }
                None => debug!("Service {} has no publicURL", service.service_type),
            }
        }
    }
    endpoints
}

fn v3_endpoints(catalog: &[V3Service], region: &str) -> BTreeMap<String, String> {
    let mut endpoints = BTreeMap::new();
    for service in catalog {
        for endpoint in &service.endpoints {
            if endpoint.region.as_deref() != Some(region) {
                debug!("Skipping {} endpoint outside region {}", service.service_type, region);
                continue;
            }
            if endpoint.interface.as_deref() == Some("public") {
                endpoints.insert(service.service_type.clone(), endpoint.url.clone());
            }
        }
    }
    endpoints
}
