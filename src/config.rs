//! Configuration file
//!
//! The cloud subcommands read a YAML file holding the credential and
//! optional driver tuning:
//!
//! ```yaml
//! credential:
//!   cloud_type: openstack
//!   auth_url: http://keystone:5000/v3
//!   username: admin
//!   password: secret
//!   project_name: demo
//!   node_id: 6b1c...
//! openstack:
//!   insecure: true
//!   poll_timeout_secs: 1800
//! ```

use crate::cloud::http::HttpConfig;
use crate::cloud::openstack::{AttachConfig, CatalogConfig, LocalNodeConfig, OpenStackConfig, PollConfig};
use crate::cloud::CloudConfig;
use crate::domain::ports::CloudCredential;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Driver tuning; every field is optional in the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenStackSettings {
    pub catalog: CatalogConfig,
    pub local: LocalNodeConfig,
    /// Accept self-signed certificates
    pub insecure: bool,
    pub request_timeout_secs: u64,
    pub poll_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub attach_attempts: u32,
    pub device_timeout_secs: u64,
    pub device_interval_secs: u64,
}

impl Default for OpenStackSettings {
    fn default() -> Self {
        let http = HttpConfig::default();
        let poll = PollConfig::default();
        let attach = AttachConfig::default();
        Self {
            catalog: CatalogConfig::default(),
            local: LocalNodeConfig::default(),
            insecure: http.insecure,
            request_timeout_secs: http.timeout.as_secs(),
            poll_timeout_secs: poll.timeout.as_secs(),
            poll_interval_secs: poll.interval.as_secs(),
            attach_attempts: attach.attempts,
            device_timeout_secs: attach.device_timeout.as_secs(),
            device_interval_secs: attach.device_interval.as_secs(),
        }
    }
}

impl OpenStackSettings {
    pub fn to_config(&self) -> OpenStackConfig {
        OpenStackConfig {
            catalog: self.catalog.clone(),
            http: HttpConfig {
                timeout: Duration::from_secs(self.request_timeout_secs),
                insecure: self.insecure,
            },
            poll: PollConfig {
                timeout: Duration::from_secs(self.poll_timeout_secs),
                interval: Duration::from_secs(self.poll_interval_secs),
            },
            attach: AttachConfig {
                attempts: self.attach_attempts,
                device_timeout: Duration::from_secs(self.device_timeout_secs),
                device_interval: Duration::from_secs(self.device_interval_secs),
            },
            local: self.local.clone(),
        }
    }
}

/// Contents of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoutConfig {
    pub credential: CloudCredential,
    #[serde(default)]
    pub openstack: OpenStackSettings,
}

impl ScoutConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&content)?;
        info!(
            "Loaded {} credential for {} from {}",
            config.credential.cloud_type,
            config.credential.auth_url,
            path.display()
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let credential = &self.credential;
        for (field, value) in [
            ("auth_url", &credential.auth_url),
            ("username", &credential.username),
            ("password", &credential.password),
            ("project_name", &credential.project_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Configuration(format!("credential.{} is required", field)));
            }
        }
        let settings = &self.openstack;
        if settings.poll_interval_secs == 0 || settings.attach_attempts == 0 {
            return Err(Error::Configuration(
                "openstack.poll_interval_secs and openstack.attach_attempts must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn cloud_config(&self) -> CloudConfig {
        CloudConfig {
            openstack: self.openstack.to_config(),
        }
    }
}
