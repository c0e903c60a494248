//! Network state snapshots
//!
//! Captures what a resource's exposure looks like before anything touches it.
//! The snapshot is read-only; a failed capture means the resource is left
//! alone for the rest of the run.

use crate::azure::{ArmError, ArmResult};
use crate::control_plane::CloudControlPlane;
use crate::resolver::{ResolvedResources, ResourceSlot};
use km_provision_common::{FirewallRule, NetworkState, ResourceRef};
use tracing::{debug, warn};

/// Captured exposure of one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub slot: ResourceSlot,
    /// Exposure before elevation
    pub state: NetworkState,
    /// Inbound rules present before elevation, for kinds that have them
    pub firewall_rules: Vec<FirewallRule>,
}

impl Snapshot {
    pub fn resource(&self) -> &ResourceRef {
        self.state.resource()
    }

    /// A pre-existing rule that already admits every address, if any
    pub fn full_range_rule(&self) -> Option<&FirewallRule> {
        self.firewall_rules.iter().find(|r| r.is_full_range())
    }
}

/// A resource whose exposure could not be read
#[derive(Debug)]
pub struct CaptureFailure {
    pub slot: ResourceSlot,
    pub resource: ResourceRef,
    pub error: ArmError,
}

/// Read the current exposure of a resource, without mutating anything
pub async fn capture<C: CloudControlPlane>(
    cp: &C,
    slot: ResourceSlot,
    resource: &ResourceRef,
) -> ArmResult<Snapshot> {
    let exposure = cp.get_exposure(resource).await?;
    let firewall_rules = if resource.kind().exposure_profile().temporary_rule {
        cp.list_firewall_rules(resource).await?
    } else {
        Vec::new()
    };

    debug!(
        resource = %resource,
        public_access = exposure.public_access_enabled,
        default_action = ?exposure.default_action,
        rules = firewall_rules.len(),
        "Captured network state"
    );

    Ok(Snapshot {
        slot,
        state: NetworkState::captured(resource.clone(), exposure),
        firewall_rules,
    })
}

/// Capture every resolved resource in slot order
///
/// Failures are returned alongside the successes and logged as warnings.
pub async fn capture_all<C: CloudControlPlane>(
    cp: &C,
    resources: &ResolvedResources,
) -> (Vec<Snapshot>, Vec<CaptureFailure>) {
    let mut snapshots = Vec::new();
    let mut failures = Vec::new();

    for (slot, resource) in resources.resolved() {
        match capture(cp, slot, resource).await {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(error) => {
                warn!(
                    slot = %slot,
                    resource = %resource,
                    error = %error,
                    "Could not capture network state; resource will not be elevated"
                );
                failures.push(CaptureFailure {
                    slot,
                    resource: resource.clone(),
                    error,
                });
            }
        }
    }

    (snapshots, failures)
}
