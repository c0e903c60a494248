//! Access elevation
//!
//! Compares a snapshot to the reachable target for its kind and applies only
//! the deltas. The resulting [`NetworkState`] is registered for restoration
//! *before* the first mutation, so a half-finished elevation still gets
//! reverted.

use crate::control_plane::CloudControlPlane;
use crate::error::OrchestratorError;
use crate::restore::ElevationRegistry;
use crate::snapshot::Snapshot;
use km_provision_common::{DefaultAction, FirewallRule, ResourceRef};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Changes needed to make one resource reachable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ElevationPlan {
    pub enable_public_access: bool,
    pub allow_default_action: bool,
    /// Temporary full-range rule to create
    pub create_rule: Option<String>,
    /// A full-range rule that already existed and is left alone
    pub existing_full_range_rule: Option<String>,
}

impl ElevationPlan {
    /// Nothing to change
    pub fn is_noop(&self) -> bool {
        !self.enable_public_access && !self.allow_default_action && self.create_rule.is_none()
    }

    /// Human-readable list of changes, for dry runs and logs
    pub fn describe(&self) -> Vec<String> {
        let mut changes = Vec::new();
        if self.enable_public_access {
            changes.push("enable public network access".to_string());
        }
        if self.allow_default_action {
            changes.push("set default network action to Allow".to_string());
        }
        if let Some(rule) = &self.create_rule {
            changes.push(format!("create firewall rule '{rule}' (0.0.0.0-255.255.255.255)"));
        }
        if let Some(rule) = &self.existing_full_range_rule {
            changes.push(format!("reuse existing full-range rule '{rule}'"));
        }
        changes
    }
}

/// Compute the deltas between a snapshot and the reachable configuration
pub fn plan(snapshot: &Snapshot, temp_rule_name: &str) -> ElevationPlan {
    let profile = snapshot.resource().kind().exposure_profile();
    let state = &snapshot.state;

    let mut plan = ElevationPlan {
        enable_public_access: profile.public_access && !state.public_access_enabled(),
        allow_default_action: profile.default_action
            && state.default_action() != Some(DefaultAction::Allow),
        ..Default::default()
    };

    if profile.temporary_rule {
        match snapshot.full_range_rule() {
            Some(existing) => plan.existing_full_range_rule = Some(existing.name.clone()),
            None => plan.create_rule = Some(free_rule_name(&snapshot.firewall_rules, temp_rule_name)),
        }
    }

    plan
}

/// `base`, or `base-2`, `base-3`, ... if a rule of that name already exists.
/// Rule names compare case-insensitively on the server side.
fn free_rule_name(rules: &[FirewallRule], base: &str) -> String {
    let taken = |name: &str| rules.iter().any(|r| r.name.eq_ignore_ascii_case(name));
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|name| !taken(name))
        .unwrap_or_else(|| base.to_string())
}

/// What `elevate` did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, strum::Display)]
pub enum ElevationOutcome {
    /// Already reachable; no call made, nothing registered
    AlreadyReachable,
    /// Changes applied and registered for restoration
    Elevated(ElevationPlan),
    /// Elevated earlier in this run; no call made
    AlreadyElevated,
}

/// Applies elevation plans and records them for restoration
pub struct Elevator<'a, C> {
    cp: &'a C,
    registry: ElevationRegistry,
    temp_rule_name: String,
}

impl<'a, C: CloudControlPlane> Elevator<'a, C> {
    pub fn new(cp: &'a C, registry: ElevationRegistry, temp_rule_name: impl Into<String>) -> Self {
        Self {
            cp,
            registry,
            temp_rule_name: temp_rule_name.into(),
        }
    }

    pub fn temp_rule_name(&self) -> &str {
        &self.temp_rule_name
    }

    /// Make the snapshot's resource reachable
    ///
    /// Idempotent: an already reachable resource or one elevated earlier in
    /// the run costs no control-plane call.
    pub async fn elevate(&self, snapshot: &Snapshot) -> Result<ElevationOutcome, OrchestratorError> {
        let resource = snapshot.resource();
        if self.registry.contains(resource) {
            debug!(resource = %resource, "Already elevated in this run");
            return Ok(ElevationOutcome::AlreadyElevated);
        }

        let plan = plan(snapshot, &self.temp_rule_name);
        if let Some(rule) = &plan.existing_full_range_rule {
            info!(resource = %resource, rule = %rule, "Full-range firewall rule already present, not creating another");
        }
        if let Some(rule) = plan.create_rule.as_deref().filter(|r| *r != self.temp_rule_name) {
            warn!(resource = %resource, rule = %rule, taken = %self.temp_rule_name, "Temporary rule name already in use, using another");
        }
        if plan.is_noop() {
            debug!(resource = %resource, "Already reachable");
            return Ok(ElevationOutcome::AlreadyReachable);
        }

        let mut state = snapshot.state.clone();
        if let Some(rule) = &plan.create_rule {
            state = state.with_temporary_rule(rule.clone());
        }
        self.registry.register(state);

        self.apply(resource, &plan)
            .await
            .map_err(|source| OrchestratorError::NetworkMutation {
                resource: resource.clone(),
                source,
            })?;

        info!(resource = %resource, changes = ?plan.describe(), "Elevated network access");
        Ok(ElevationOutcome::Elevated(plan))
    }

    async fn apply(&self, resource: &ResourceRef, plan: &ElevationPlan) -> crate::azure::ArmResult<()> {
        if plan.enable_public_access {
            self.cp.set_public_access(resource, true).await?;
        }
        if plan.allow_default_action {
            self.cp
                .set_default_action(resource, DefaultAction::Allow)
                .await?;
        }
        if let Some(rule) = &plan.create_rule {
            self.cp
                .create_firewall_rule(resource, &FirewallRule::full_range(rule.as_str()))
                .await?;
        }
        Ok(())
    }
}
