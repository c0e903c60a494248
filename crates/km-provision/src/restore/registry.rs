//! Thread-safe registry of elevated resources

use super::snapshot_file::SnapshotFile;
use km_provision_common::{NetworkState, ResourceRef};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Records every [`NetworkState`] the elevator registered, in elevation order
///
/// Entries are added before the first mutation of a resource, so a partial
/// elevation is still restored. Clones share the same entries.
#[derive(Clone, Default)]
pub struct ElevationRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    states: Mutex<Vec<NetworkState>>,
    /// Mirror of `states` on disk, for recovery after a hard kill
    snapshot_file: Option<SnapshotFile>,
}

impl ElevationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that rewrites `path` after every change
    pub fn with_snapshot_file(path: impl Into<PathBuf>, run_id: &str, resource_group: &str) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                states: Mutex::new(Vec::new()),
                snapshot_file: Some(SnapshotFile::new(path, run_id, resource_group)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<NetworkState>> {
        self.inner.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, states: &[NetworkState]) {
        if let Some(file) = &self.inner.snapshot_file {
            if let Err(e) = file.write(states) {
                warn!(path = %file.path().display(), error = ?e, "Failed to write snapshot file");
            }
        }
    }

    /// Register a state for restoration
    ///
    /// Returns `false` and keeps the earlier entry when the resource is
    /// already registered.
    pub fn register(&self, state: NetworkState) -> bool {
        let mut states = self.lock();
        if states.iter().any(|s| s.resource() == state.resource()) {
            return false;
        }
        states.push(state);
        self.persist(&states);
        true
    }

    /// Whether the resource has been registered during this run
    pub fn contains(&self, resource: &ResourceRef) -> bool {
        self.lock().iter().any(|s| s.resource() == resource)
    }

    /// Mark a resource as restored
    pub fn mark_restored(&self, resource: &ResourceRef) {
        let mut states = self.lock();
        if let Some(state) = states.iter_mut().find(|s| s.resource() == resource) {
            state.mark_restored();
        }
        self.persist(&states);
    }

    /// States not yet restored, in elevation order
    pub fn pending(&self) -> Vec<NetworkState> {
        self.lock()
            .iter()
            .filter(|s| !s.is_restored())
            .cloned()
            .collect()
    }

    /// All registered states, in elevation order
    pub fn all(&self) -> Vec<NetworkState> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove the snapshot file once nothing is left to restore
    pub fn discard_snapshot_file(&self) {
        if let Some(file) = &self.inner.snapshot_file {
            if let Err(e) = file.remove() {
                warn!(path = %file.path().display(), error = ?e, "Failed to remove snapshot file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use km_provision_common::{ExposureConfig, ResourceKind};
    use km_provision_test_utils::test_run_id;

    fn state(name: &str) -> NetworkState {
        NetworkState::captured(
            ResourceRef::new(
                ResourceKind::SearchService,
                name,
                "rg-km",
                "00000000-0000-0000-0000-000000000001",
            ),
            ExposureConfig::closed(false),
        )
    }

    #[test]
    fn test_register_once_per_resource() {
        let registry = ElevationRegistry::new();
        assert!(registry.register(state("a")));
        assert!(!registry.register(state("a")));
        assert!(registry.register(state("b")));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(state("a").resource()));
    }

    #[test]
    fn test_pending_excludes_restored_and_keeps_order() {
        let registry = ElevationRegistry::new();
        registry.register(state("a"));
        registry.register(state("b"));
        registry.register(state("c"));

        let clone = registry.clone();
        clone.mark_restored(state("b").resource());

        let names: Vec<_> = registry
            .pending()
            .iter()
            .map(|s| s.resource().name().to_string())
            .collect();
        assert_eq!(names, ["a", "c"]);
        assert_eq!(registry.all().len(), 3);
    }

    #[test]
    fn test_snapshot_file_mirrors_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let run_id = test_run_id();
        let registry = ElevationRegistry::with_snapshot_file(&path, &run_id, "rg-km");

        registry.register(state("a"));
        let file = SnapshotFile::read(&path).unwrap();
        assert_eq!(file.states.len(), 1);
        assert_eq!(file.run_id, run_id);

        registry.mark_restored(state("a").resource());
        assert!(SnapshotFile::read(&path).unwrap().states[0].is_restored());

        registry.discard_snapshot_file();
        assert!(!path.exists());
    }
}
