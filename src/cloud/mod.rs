//! Cloud Drivers
//!
//! Provides cloud-specific drivers for:
//! - OpenStack (Nova, Cinder, Neutron)

pub mod http;
pub mod openstack;

pub use openstack::{OpenStackConfig, OpenStackDriver};

use crate::domain::ports::{CloudCredential, CloudDriverRef, CloudType};
use crate::error::Result;
use std::sync::Arc;

/// Factory for creating cloud drivers
pub struct DriverFactory;

impl DriverFactory {
    /// Create a driver for the credential's cloud type
    pub fn create(credential: CloudCredential, config: CloudConfig) -> Result<CloudDriverRef> {
        match credential.cloud_type {
            CloudType::OpenStack => Ok(Arc::new(OpenStackDriver::new(credential, config.openstack)?)),
        }
    }
}

/// Combined driver configuration
#[derive(Debug, Clone, Default)]
pub struct CloudConfig {
    pub openstack: OpenStackConfig,
}
