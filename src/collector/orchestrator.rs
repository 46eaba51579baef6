//! Batch Collector
//!
//! Walks the host worklist in order and, for every row marked for checking:
//! - skips rows already collected (unless force-checking)
//! - skips rows without usable credentials
//! - dispatches to the collector registered for the row's OS tag
//! - records `success`/`failed` in the row and persists the worklist
//!
//! One failing host never aborts the batch.

use super::probe::ProbeConfig;
use super::registry::CollectorRegistry;
use super::worklist::{HostWorkItem, Worklist, DO_STATUS_FAILED, DO_STATUS_SUCCESS};
use crate::domain::ports::CollectionSummary;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const DEFAULT_PACKAGE_NAME: &str = "hosts_collection";

/// Credential-free copy of the worklist written after each batch
pub const SCAN_REPORT_FILENAME: &str = "scan_hosts.csv";

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Worklist CSV, rewritten in place
    pub host_file: PathBuf,
    /// Base directory for collection output
    pub output_path: PathBuf,
    /// Re-collect hosts already marked successful
    pub force_check: bool,
    /// Directory under `output_path` holding this collection
    pub package_name: String,
    pub probe: ProbeConfig,
}

impl CollectorConfig {
    pub fn new(host_file: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            host_file: host_file.into(),
            output_path: output_path.into(),
            force_check: false,
            package_name: DEFAULT_PACKAGE_NAME.to_string(),
            probe: ProbeConfig::default(),
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Outcome of one batch, hosts listed by tag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionReport {
    pub total_check_hosts: Vec<String>,
    pub success_hosts: Vec<String>,
    pub failed_hosts: Vec<String>,
    pub skipped_hosts: Vec<String>,
    pub summaries: Vec<CollectionSummary>,
}

impl CollectionReport {
    fn log(&self) {
        info!("=========== Summary ==========");
        info!(
            "Need to check {} host(s), success {} host(s), failed {} host(s)",
            self.total_check_hosts.len(),
            self.success_hosts.len(),
            self.failed_hosts.len()
        );
        if !self.success_hosts.is_empty() {
            debug!("Success hosts: {:?}", self.success_hosts);
        }
        if !self.failed_hosts.is_empty() {
            info!("Failed hosts: {:?}", self.failed_hosts);
        }

        if !self.summaries.is_empty() {
            info!("=========== Detailed ==========");
            for summary in &self.summaries {
                for line in &summary.info {
                    info!("{}", line);
                }
                info!("------------------------------");
                for line in &summary.debug {
                    debug!("{}", line);
                }
            }
        }
        info!("==============================");
    }
}

// =============================================================================
// Batch Collector
// =============================================================================

pub struct BatchCollector {
    config: CollectorConfig,
    registry: CollectorRegistry,
}

impl BatchCollector {
    pub fn new(config: CollectorConfig, registry: CollectorRegistry) -> Self {
        Self { config, registry }
    }

    /// Collector with the built-in reachability probes
    pub fn with_defaults(config: CollectorConfig) -> Self {
        let registry = CollectorRegistry::with_defaults(config.probe);
        Self::new(config, registry)
    }

    /// Directory all artifacts of this collection go under
    pub fn collection_path(&self) -> PathBuf {
        self.config.output_path.join(&self.config.package_name)
    }

    pub fn scan_report_path(&self) -> PathBuf {
        self.collection_path().join(SCAN_REPORT_FILENAME)
    }

    fn prepare(&self) -> Result<()> {
        let output = &self.config.output_path;
        if !output.exists() {
            info!("Creating output path {}", output.display());
            std::fs::create_dir_all(output)?;
        }

        let collection = self.collection_path();
        if collection.exists() && self.config.force_check {
            info!("Deleting existing collection path {}", collection.display());
            std::fs::remove_dir_all(&collection)?;
        }
        if !collection.exists() {
            info!("Creating collection path {}", collection.display());
            std::fs::create_dir_all(&collection)?;
        }
        Ok(())
    }

    /// Collect every eligible host in the worklist
    pub async fn collect_hosts(&self) -> Result<CollectionReport> {
        let mut worklist = Worklist::load(&self.config.host_file)?;
        self.prepare()?;

        info!("Collecting hosts information from {}", self.config.host_file.display());
        let mut report = CollectionReport::default();
        let collection = self.collection_path();

        for index in 0..worklist.len() {
            let item = worklist.items[index].clone();
            let tag = item.tag();
            debug!("Current row is: {:?}", HostRowDebug(&item));

            if !item.is_need_check(self.config.force_check) {
                info!("Skip to check host {}", tag);
                report.skipped_hosts.push(tag);
                continue;
            }
            if let Some(reason) = item.missing_credentials() {
                warn!("Skip to collect {} information due to {}", tag, reason);
                report.skipped_hosts.push(tag);
                continue;
            }

            info!("Collecting host {}", tag);
            report.total_check_hosts.push(tag.clone());

            let do_status = match self.collect_one(&item, &collection).await {
                Ok(summary) => {
                    info!("Collect host {} success", tag);
                    report.summaries.extend(summary);
                    report.success_hosts.push(tag);
                    DO_STATUS_SUCCESS
                }
                Err(e) => {
                    error!("Host {} check failed due to: {}", tag, e);
                    report.failed_hosts.push(tag);
                    DO_STATUS_FAILED
                }
            };

            worklist.items[index].do_status = do_status.to_string();
            worklist.save()?;
        }

        if let Err(e) = worklist.save_scan_report(&self.scan_report_path()) {
            error!("Saving scan report failed due to: {}", e);
        }

        report.log();
        Ok(report)
    }

    async fn collect_one(&self, item: &HostWorkItem, collection: &Path) -> Result<Option<CollectionSummary>> {
        let target = item.target(collection)?;
        let mut collector = self.registry.create(target)?;
        collector.collect().await?;
        Ok(collector.summary())
    }
}

/// Row debug output with the password masked
struct HostRowDebug<'a>(&'a HostWorkItem);

impl std::fmt::Debug for HostRowDebug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let row = self.0;
        f.debug_struct("HostWorkItem")
            .field("hostname", &row.hostname)
            .field("ip", &row.ip)
            .field("username", &row.username)
            .field("password", &if row.password.is_empty() { "" } else { "***" })
            .field("ssh_port", &row.ssh_port)
            .field("key_path", &row.key_path)
            .field("os", &row.os_type)
            .field("check_status", &row.check_status)
            .field("do_status", &row.do_status)
            .finish()
    }
}
