//! Host artifacts
//!
//! Each collected host produces one YAML document at
//! `<collection>/<os_type>/<os_type>_<ip>.yaml` with a single root key
//! `<os_type>_<ip>` wrapping the raw facts and a status envelope.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Outcome recorded in the artifact envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Success,
    Failed,
    Unreachable,
}

/// Facts collected for one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostArtifact {
    pub os_type: String,
    pub ip: String,
    pub status: CollectionStatus,
    #[serde(default)]
    pub tcp_ports: String,
    pub collected_at: DateTime<Utc>,
    /// Raw facts, in collection order
    #[serde(default)]
    pub results: IndexMap<String, serde_yaml::Value>,
}

impl HostArtifact {
    pub fn new(os_type: &str, ip: &str, status: CollectionStatus) -> Self {
        Self {
            os_type: os_type.to_uppercase(),
            ip: ip.to_string(),
            status,
            tcp_ports: String::new(),
            collected_at: Utc::now(),
            results: IndexMap::new(),
        }
    }

    /// Record one fact
    pub fn insert(&mut self, key: &str, value: impl Into<serde_yaml::Value>) {
        self.results.insert(key.to_string(), value.into());
    }

    pub fn root_key(&self) -> String {
        format!("{}_{}", self.os_type, self.ip)
    }

    /// Where this artifact lives under `collection_path`
    pub fn path(&self, collection_path: &Path) -> PathBuf {
        collection_path
            .join(&self.os_type)
            .join(format!("{}.yaml", self.root_key()))
    }

    /// Write the document, replacing any earlier one for the same host
    pub fn save(&self, collection_path: &Path) -> Result<PathBuf> {
        let path = self.path(collection_path);
        let dir = path
            .parent()
            .ok_or_else(|| Error::Internal(format!("artifact path {} has no parent", path.display())))?;
        if !dir.exists() {
            info!("Creating OS path {}", dir.display());
            std::fs::create_dir_all(dir)?;
        }

        let mut document = IndexMap::new();
        document.insert(self.root_key(), self);
        let yaml = serde_yaml::to_string(&document)?;
        debug!("Artifact for {}:\n{}", self.root_key(), yaml);

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(yaml.as_bytes())?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        info!("Saved artifact to {}", path.display());
        Ok(path)
    }

    /// Read a document written by [`save`](Self::save)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let document: IndexMap<String, HostArtifact> = serde_yaml::from_str(&content)?;
        document
            .into_values()
            .next()
            .ok_or_else(|| Error::Validation(format!("artifact {} is empty", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_layout() {
        let dir = TempDir::new().unwrap();
        let mut artifact = HostArtifact::new("linux", "10.0.0.5", CollectionStatus::Success);
        artifact.tcp_ports = "22,80".into();
        artifact.insert("hostname", "web-1");
        artifact.insert("port", 22u64);

        let path = artifact.save(dir.path()).unwrap();

        assert_eq!(path, dir.path().join("LINUX").join("LINUX_10.0.0.5.yaml"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("LINUX_10.0.0.5:"));
        assert!(content.contains("status: success"));

        let loaded = HostArtifact::load(&path).unwrap();
        assert_eq!(loaded, artifact);
        assert_eq!(loaded.results.keys().collect::<Vec<_>>(), vec!["hostname", "port"]);
    }

    #[test]
    fn test_save_replaces_previous() {
        let dir = TempDir::new().unwrap();
        HostArtifact::new("WINDOWS", "10.0.0.6", CollectionStatus::Unreachable)
            .save(dir.path())
            .unwrap();
        let path = HostArtifact::new("WINDOWS", "10.0.0.6", CollectionStatus::Success)
            .save(dir.path())
            .unwrap();

        assert_eq!(HostArtifact::load(&path).unwrap().status, CollectionStatus::Success);
        assert_eq!(std::fs::read_dir(dir.path().join("WINDOWS")).unwrap().count(), 1);
    }
}
