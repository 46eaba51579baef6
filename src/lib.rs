//! Migration Scout
//!
//! Inventories hosts ahead of a migration into a target cloud and checks
//! that the cloud can take them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              CLI (clap)                               │
//! ├───────────────────────────────────┬──────────────────────────────────┤
//! │        Batch Host Collection      │          Cloud Drivers           │
//! │  ┌─────────────┐ ┌─────────────┐  │  ┌────────────────────────────┐  │
//! │  │  Worklist   │ │  Collector  │  │  │   CloudDriver (trait)      │  │
//! │  │   (CSV)     │ │  Registry   │  │  └─────────────┬──────────────┘  │
//! │  └─────────────┘ └──────┬──────┘  │                │                 │
//! │                         │         │  ┌─────────────┴──────────────┐  │
//! │  ┌──────────────────────┴──────┐  │  │  OpenStack                 │  │
//! │  │  Collectors -> YAML         │  │  │  Keystone / Nova /         │  │
//! │  │  artifacts per host         │  │  │  Cinder / Neutron          │  │
//! │  └─────────────────────────────┘  │  └────────────────────────────┘  │
//! └───────────────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cloud`]: Cloud drivers and the HTTP transport
//! - [`collector`]: Batch host collection
//! - [`config`]: Configuration file loading
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod cloud;
pub mod collector;
pub mod config;
pub mod domain;
pub mod error;

// Re-export commonly used types
pub use cloud::{CloudConfig, DriverFactory, OpenStackConfig, OpenStackDriver};

pub use collector::{
    BatchCollector, CollectionReport, CollectorConfig, CollectorRegistry, HostArtifact, Worklist,
};

pub use config::ScoutConfig;

pub use domain::ports::{
    CloudCredential, CloudDriver, CloudDriverRef, CloudInfo, CloudType, HostCollector, HostTarget,
    IpAddrStatus, MigrationInstance, PlacementParams, QuotaSnapshot, QuotaUsage,
};

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
