//! On-disk copy of the elevation registry
//!
//! If the process is killed hard (SIGKILL, host loss) no in-process cleanup
//! can run. The registry mirrors itself into a JSON file so that
//! `km-provision restore --snapshot-file` can finish the job later.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use km_provision_common::NetworkState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Serialized registry contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub run_id: String,
    pub resource_group: String,
    pub written_at: DateTime<Utc>,
    /// States in elevation order
    pub states: Vec<NetworkState>,
}

impl SnapshotDocument {
    /// States that still need restoring, in elevation order
    pub fn pending(&self) -> impl Iterator<Item = &NetworkState> {
        self.states.iter().filter(|s| !s.is_restored())
    }
}

/// Handle to a snapshot file owned by one run
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
    run_id: String,
    resource_group: String,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>, run_id: &str, resource_group: &str) -> Self {
        Self {
            path: path.into(),
            run_id: run_id.to_string(),
            resource_group: resource_group.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file contents with `states`
    ///
    /// Writes to a sibling temp file first and renames it over the target.
    pub fn write(&self, states: &[NetworkState]) -> Result<()> {
        let doc = SnapshotDocument {
            run_id: self.run_id.clone(),
            resource_group: self.resource_group.clone(),
            written_at: Utc::now(),
            states: states.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&doc).context("Failed to serialize snapshot")?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move snapshot into {}", self.path.display()))?;
        Ok(())
    }

    /// Delete the file, ignoring a file that is already gone
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(e).with_context(|| format!("Failed to remove {}", self.path.display()))
            }
            _ => Ok(()),
        }
    }

    /// Load a snapshot document
    pub fn read(path: &Path) -> Result<SnapshotDocument> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read snapshot file {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Snapshot file {} is not valid", path.display()))
    }
}
