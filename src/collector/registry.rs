//! Collector registry
//!
//! Maps an OS tag (`LINUX`, `WINDOWS`, `VMWARE`, ...) to a factory that
//! builds a [`HostCollector`] for one host. New OS families plug in by
//! registering a factory; nothing else in the batch loop changes.

use super::probe::{ProbeConfig, ReachabilityCollector};
use crate::domain::ports::{HostCollector, HostTarget};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// OS tags the built-in reachability collector answers for
pub const BUILTIN_OS_TYPES: [&str; 3] = ["LINUX", "WINDOWS", "VMWARE"];

/// Builds a collector for one host
pub type CollectorFactory = Arc<dyn Fn(HostTarget) -> Result<Box<dyn HostCollector>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct CollectorRegistry {
    factories: BTreeMap<String, CollectorFactory>,
}

impl CollectorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the reachability collector for every built-in OS tag
    pub fn with_defaults(probe: ProbeConfig) -> Self {
        let mut registry = Self::new();
        for os_type in BUILTIN_OS_TYPES {
            registry.register(os_type, move |target| {
                Ok(Box::new(ReachabilityCollector::new(target, probe)) as Box<dyn HostCollector>)
            });
        }
        registry
    }

    /// Register `factory` for `os_type`, replacing any earlier one
    pub fn register<F>(&mut self, os_type: &str, factory: F)
    where
        F: Fn(HostTarget) -> Result<Box<dyn HostCollector>> + Send + Sync + 'static,
    {
        let key = os_type.to_uppercase();
        debug!("Registering host collector for {}", key);
        self.factories.insert(key, Arc::new(factory));
    }

    pub fn os_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the collector for `target.os_type`
    pub fn create(&self, target: HostTarget) -> Result<Box<dyn HostCollector>> {
        let factory = self
            .factories
            .get(&target.os_type.to_uppercase())
            .ok_or_else(|| Error::UnsupportedOsType {
                os_type: target.os_type.clone(),
                host: target.ip.clone(),
            })?;
        factory(target)
    }
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("os_types", &self.os_types())
            .finish()
    }
}
