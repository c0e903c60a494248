//! Restoration from a snapshot file left behind by a killed run

use crate::control_plane::CloudControlPlane;
use crate::restore::{ElevationRegistry, RestoreReport, SnapshotFile, restore_pending};
use anyhow::Result;
use std::path::Path;
use tracing::info;

/// Restore every pending state recorded in `path`
///
/// The file is rewritten as resources are restored and removed once nothing
/// is left, so a partially failed recovery can simply be run again.
pub async fn restore_from_file<C: CloudControlPlane>(cp: &C, path: &Path) -> Result<RestoreReport> {
    let doc = SnapshotFile::read(path)?;
    let pending: Vec<_> = doc.pending().cloned().collect();
    info!(
        run_id = %doc.run_id,
        resource_group = %doc.resource_group,
        written_at = %doc.written_at,
        pending = pending.len(),
        "Restoring from snapshot file"
    );

    let registry = ElevationRegistry::with_snapshot_file(path, &doc.run_id, &doc.resource_group);
    for state in pending {
        registry.register(state);
    }

    Ok(restore_pending(cp, &registry).await)
}
