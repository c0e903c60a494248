//! Access restoration
//!
//! Every resource the elevator touched is put back the way the snapshot found
//! it. Restoration runs in reverse elevation order, compares against the live
//! configuration so only changed knobs are written, deletes a temporary rule
//! only when this run created it, and never raises: failures are logged and
//! returned in a [`RestoreReport`].

mod guard;
mod registry;
pub mod snapshot_file;

pub use guard::RestoreGuard;
pub use registry::ElevationRegistry;
pub use snapshot_file::{SnapshotDocument, SnapshotFile};

use crate::azure::{ArmError, ignore_not_found};
use crate::control_plane::CloudControlPlane;
use km_provision_common::{NetworkState, ResourceRef};
use serde::Serialize;
use tracing::{error, info, warn};

/// A resource that could not be fully restored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreFailure {
    pub resource: ResourceRef,
    /// One message per failed control-plane call
    pub errors: Vec<String>,
}

/// Outcome of a restoration pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Restored resources, in the order they were restored
    pub restored: Vec<ResourceRef>,
    pub failed: Vec<RestoreFailure>,
}

impl RestoreReport {
    /// Nothing failed
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failure_for(&self, resource: &ResourceRef) -> Option<&RestoreFailure> {
        self.failed.iter().find(|f| &f.resource == resource)
    }
}

/// Revert one resource to its captured state
///
/// Every knob is attempted even if an earlier one fails. The temporary rule
/// goes first since it is the widest opening.
pub async fn restore_state<C: CloudControlPlane>(cp: &C, state: &NetworkState) -> Vec<ArmError> {
    let resource = state.resource();
    let mut errors = Vec::new();

    if let Some(rule) = state
        .temporary_rule_name()
        .filter(|_| state.extra_temporary_rule_created())
    {
        match ignore_not_found(cp.delete_firewall_rule(resource, rule).await) {
            Ok(()) => info!(resource = %resource, rule, "Deleted temporary firewall rule"),
            Err(e) => errors.push(e),
        }
    }

    // Unreadable live state means every knob gets written blind
    let current = match cp.get_exposure(resource).await {
        Ok(current) => Some(current),
        Err(e) => {
            warn!(resource = %resource, error = %e, "Could not read current exposure, restoring every knob");
            None
        }
    };

    if let Some(action) = state.default_action() {
        if current.is_none_or(|c| c.default_action != Some(action)) {
            match cp.set_default_action(resource, action).await {
                Ok(()) => info!(resource = %resource, default_action = %action, "Restored default network action"),
                Err(e) => errors.push(e),
            }
        }
    }

    let enabled = state.public_access_enabled();
    if current.is_none_or(|c| c.public_access_enabled != enabled) {
        match cp.set_public_access(resource, enabled).await {
            Ok(()) => info!(resource = %resource, public_access = enabled, "Restored public network access"),
            Err(e) => errors.push(e),
        }
    }

    errors
}

/// Restore every pending registry entry in reverse elevation order
pub async fn restore_pending<C: CloudControlPlane>(
    cp: &C,
    registry: &ElevationRegistry,
) -> RestoreReport {
    let mut report = RestoreReport::default();

    for state in registry.pending().iter().rev() {
        let resource = state.resource();
        let errors = restore_state(cp, state).await;
        if errors.is_empty() {
            registry.mark_restored(resource);
            report.restored.push(resource.clone());
            continue;
        }

        for e in &errors {
            let suggestion = e.suggestion().unwrap_or_default();
            error!(resource = %resource, error = %e, suggestion = %suggestion, "Restoration step failed");
        }
        report.failed.push(RestoreFailure {
            resource: resource.clone(),
            errors: errors.iter().map(ToString::to_string).collect(),
        });
    }

    if report.is_clean() {
        if !report.restored.is_empty() {
            info!(count = report.restored.len(), "All elevated resources restored");
        }
        registry.discard_snapshot_file();
    } else {
        warn!(
            restored = report.restored.len(),
            failed = report.failed.len(),
            "Restoration partially failed; affected resources may still be exposed"
        );
    }

    report
}
