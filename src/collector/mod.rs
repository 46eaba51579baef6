//! Host Collection
//!
//! Batch collection of host facts driven by a CSV worklist:
//! - `worklist`: load, mutate and persist host rows
//! - `registry`: OS tag to collector factory mapping
//! - `artifact`: per-host YAML documents
//! - `probe`: built-in reachability collector
//! - `orchestrator`: the batch loop

pub mod artifact;
pub mod orchestrator;
pub mod probe;
pub mod registry;
pub mod worklist;

pub use artifact::{CollectionStatus, HostArtifact};
pub use orchestrator::{BatchCollector, CollectionReport, CollectorConfig, DEFAULT_PACKAGE_NAME};
pub use probe::{ProbeConfig, ReachabilityCollector};
pub use registry::{CollectorFactory, CollectorRegistry};
pub use worklist::{HostWorkItem, Worklist};
