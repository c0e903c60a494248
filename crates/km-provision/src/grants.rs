//! Idempotent role grants
//!
//! Each required (principal, role, scope) tuple is checked before it is
//! created. Assignments inherited from a parent scope count as present, and a
//! create that races another writer (409 `RoleAssignmentExists`) is reported
//! as pre-existing rather than failed.

use crate::azure::ArmResult;
use crate::control_plane::CloudControlPlane;
use crate::error::OrchestratorError;
use crate::resolver::{ResolvedResources, ResourceSlot};
use crate::wait::{WaitOutcome, wait_until};
use km_provision_common::{BuiltinRole, PrincipalType, ResourceRef, RetryPolicy, RoleGrant};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Whether a failed grant blocks the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Gating {
    Required,
    Advisory,
}

/// What to do when a new grant does not propagate in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PropagationTimeout {
    /// Fail the run
    Fail,
    /// Log a warning and continue
    #[default]
    Warn,
}

/// One grant the pipeline needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantRequirement {
    pub role: BuiltinRole,
    pub scope_slot: ResourceSlot,
    pub gating: Gating,
    /// Wait for a newly created grant to be listed before continuing
    pub await_propagation: bool,
    pub on_timeout: PropagationTimeout,
}

impl GrantRequirement {
    pub fn required(role: BuiltinRole, scope_slot: ResourceSlot) -> Self {
        Self {
            role,
            scope_slot,
            gating: Gating::Required,
            await_propagation: false,
            on_timeout: PropagationTimeout::default(),
        }
    }

    pub fn advisory(role: BuiltinRole, scope_slot: ResourceSlot) -> Self {
        Self {
            gating: Gating::Advisory,
            ..Self::required(role, scope_slot)
        }
    }

    pub fn awaiting_propagation(mut self) -> Self {
        self.await_propagation = true;
        self
    }

    /// Treat a propagation timeout as a failure of this requirement
    pub fn failing_on_timeout(mut self) -> Self {
        self.on_timeout = PropagationTimeout::Fail;
        self
    }
}

/// Grants the default pipeline relies on
pub fn default_grant_plan() -> Vec<GrantRequirement> {
    vec![
        GrantRequirement::required(BuiltinRole::SearchIndexDataContributor, ResourceSlot::Search)
            .awaiting_propagation(),
        GrantRequirement::required(BuiltinRole::StorageBlobDataContributor, ResourceSlot::Storage)
            .awaiting_propagation(),
        GrantRequirement::required(BuiltinRole::CognitiveServicesOpenAiUser, ResourceSlot::AiServices),
        GrantRequirement::advisory(
            BuiltinRole::CognitiveServicesUser,
            ResourceSlot::ContentUnderstanding,
        ),
        GrantRequirement::advisory(BuiltinRole::CognitiveServicesUser, ResourceSlot::AiServices),
    ]
}

/// Ensure `principal_id` holds `role` on `scope`, creating it only if absent
pub async fn ensure_grant<C: CloudControlPlane>(
    cp: &C,
    principal_id: &str,
    principal_type: PrincipalType,
    role: BuiltinRole,
    scope: &ResourceRef,
) -> ArmResult<RoleGrant> {
    let grant = |preexisting: bool, assignment_id: Option<String>| RoleGrant {
        principal_id: principal_id.to_string(),
        role,
        scope: scope.clone(),
        preexisting,
        assignment_id,
    };

    let existing = cp.list_role_assignments(scope, principal_id).await?;
    if let Some(found) = existing.iter().find(|a| a.grants(principal_id, role, scope)) {
        debug!(role = %role, scope = %scope, assignment = %found.id, "Role already granted");
        return Ok(grant(true, Some(found.id.clone())));
    }

    match cp
        .create_role_assignment(scope, principal_id, role, principal_type)
        .await
    {
        Ok(created) => {
            info!(role = %role, scope = %scope, principal_id, "Granted role");
            Ok(grant(false, Some(created.id)))
        }
        Err(e) if e.is_already_exists() => {
            debug!(role = %role, scope = %scope, "Role assignment created concurrently");
            Ok(grant(true, None))
        }
        Err(e) => Err(e),
    }
}

/// How a requirement ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, strum::Display)]
pub enum GrantStatus {
    #[strum(serialize = "pre-existing")]
    Preexisting,
    #[strum(serialize = "created")]
    Created,
    /// Created, but not seen in the listing before the waiter gave up
    #[strum(serialize = "created (propagation timed out)")]
    PropagationTimedOut,
    #[strum(serialize = "skipped (scope unavailable)")]
    SkippedScopeUnavailable,
    /// Dry run: absent, would be created
    #[strum(serialize = "would be created")]
    WouldCreate,
    #[strum(serialize = "failed")]
    Failed(String),
}

/// One row of the grant section of the run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantLine {
    pub role: BuiltinRole,
    pub scope_slot: ResourceSlot,
    pub scope: Option<ResourceRef>,
    pub gating: Gating,
    pub status: GrantStatus,
}

/// Result of ensuring a whole grant plan
#[derive(Debug, Default)]
pub struct GrantPhase {
    pub lines: Vec<GrantLine>,
    pub grants: Vec<RoleGrant>,
    /// Failures of required grants
    pub errors: Vec<OrchestratorError>,
    pub warnings: Vec<String>,
}

impl GrantPhase {
    /// No required grant failed
    pub fn is_satisfied(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Ensures a grant plan for one principal
pub struct RoleGrantor<'a, C> {
    cp: &'a C,
    principal_id: String,
    principal_type: PrincipalType,
    propagation: RetryPolicy,
    cancel: Option<CancellationToken>,
}

impl<'a, C: CloudControlPlane> RoleGrantor<'a, C> {
    pub fn new(
        cp: &'a C,
        principal_id: impl Into<String>,
        principal_type: PrincipalType,
        propagation: RetryPolicy,
    ) -> Self {
        Self {
            cp,
            principal_id: principal_id.into(),
            principal_type,
            propagation,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Ensure every requirement in order
    ///
    /// Required failures are collected in `errors`; advisory ones become
    /// warnings. The whole plan is attempted either way.
    pub async fn ensure_all(
        &self,
        plan: &[GrantRequirement],
        resources: &ResolvedResources,
    ) -> GrantPhase {
        let mut phase = GrantPhase::default();

        for req in plan {
            let line = |scope: Option<&ResourceRef>, status| GrantLine {
                role: req.role,
                scope_slot: req.scope_slot,
                scope: scope.cloned(),
                gating: req.gating,
                status,
            };

            let Some(scope) = resources.get(req.scope_slot) else {
                let message = format!(
                    "'{}' not granted: slot '{}' is unavailable",
                    req.role, req.scope_slot
                );
                match req.gating {
                    Gating::Required => phase.errors.push(OrchestratorError::ResourceNotFound {
                        slot: req.scope_slot,
                        resource: req.scope_slot.parameter().to_string(),
                        reason: message,
                    }),
                    Gating::Advisory => {
                        debug!("{message}");
                    }
                }
                phase
                    .lines
                    .push(line(None, GrantStatus::SkippedScopeUnavailable));
                continue;
            };

            let grant = match ensure_grant(
                self.cp,
                &self.principal_id,
                self.principal_type,
                req.role,
                scope,
            )
            .await
            {
                Ok(grant) => grant,
                Err(source) => {
                    let reason = source.to_string();
                    match req.gating {
                        Gating::Required => phase.errors.push(OrchestratorError::RoleAssignment {
                            role: req.role,
                            principal_id: self.principal_id.clone(),
                            scope: scope.clone(),
                            source,
                        }),
                        Gating::Advisory => {
                            warn!(role = %req.role, scope = %scope, error = %reason, "Advisory role grant failed");
                            phase.warnings.push(format!(
                                "advisory grant '{}' on {scope} failed: {reason}",
                                req.role
                            ));
                        }
                    }
                    phase.lines.push(line(Some(scope), GrantStatus::Failed(reason)));
                    continue;
                }
            };

            let status = if grant.preexisting {
                GrantStatus::Preexisting
            } else if req.await_propagation {
                self.await_propagation(req, scope, &mut phase).await
            } else {
                GrantStatus::Created
            };
            phase.lines.push(line(Some(scope), status));
            phase.grants.push(grant);
        }

        phase
    }

    /// Check each requirement without creating anything
    pub async fn preview(
        &self,
        plan: &[GrantRequirement],
        resources: &ResolvedResources,
    ) -> Vec<GrantLine> {
        let mut lines = Vec::with_capacity(plan.len());
        for req in plan {
            let scope = resources.get(req.scope_slot);
            let status = match scope {
                None => GrantStatus::SkippedScopeUnavailable,
                Some(scope) => match self.cp.list_role_assignments(scope, &self.principal_id).await {
                    Ok(listed) if listed.iter().any(|a| a.grants(&self.principal_id, req.role, scope)) => {
                        GrantStatus::Preexisting
                    }
                    Ok(_) => GrantStatus::WouldCreate,
                    Err(e) => GrantStatus::Failed(e.to_string()),
                },
            };
            lines.push(GrantLine {
                role: req.role,
                scope_slot: req.scope_slot,
                scope: scope.cloned(),
                gating: req.gating,
                status,
            });
        }
        lines
    }

    async fn await_propagation(
        &self,
        req: &GrantRequirement,
        scope: &ResourceRef,
        phase: &mut GrantPhase,
    ) -> GrantStatus {
        let what = format!("'{}' on {scope}", req.role);
        let (cp, principal_id, role) = (self.cp, self.principal_id.as_str(), req.role);
        let outcome = wait_until(&self.propagation, self.cancel.as_ref(), &what, || async move {
            let listed = cp.list_role_assignments(scope, principal_id).await?;
            Ok::<_, crate::azure::ArmError>(listed.iter().any(|a| a.grants(principal_id, role, scope)))
        })
        .await;

        match outcome {
            WaitOutcome::Converged => GrantStatus::Created,
            WaitOutcome::Cancelled => {
                phase.errors.push(OrchestratorError::Interrupted);
                GrantStatus::PropagationTimedOut
            }
            WaitOutcome::TimedOut => {
                match req.on_timeout {
                    PropagationTimeout::Fail => {
                        phase.errors.push(OrchestratorError::PropagationTimeout {
                            what,
                            attempts: self.propagation.max_attempts,
                        })
                    }
                    PropagationTimeout::Warn => {
                        phase
                            .warnings
                            .push(format!("{what} did not propagate in time; continuing"));
                    }
                }
                GrantStatus::PropagationTimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::{ArmError, RoleAssignment};
    use crate::control_plane::MockCloudControlPlane;
    use crate::testing::{FakeControlPlane, FakeOp};
    use km_provision_common::ResourceKind;
    use mockall::predicate::always;

    const SUB: &str = "00000000-0000-0000-0000-000000000001";
    const PRINCIPAL: &str = "11111111-2222-3333-4444-555555555555";

    fn search() -> ResourceRef {
        ResourceRef::new(ResourceKind::SearchService, "km-search", "rg-km", SUB)
    }

    #[tokio::test]
    async fn test_repeated_calls_create_once() {
        let cp = FakeControlPlane::new().with_closed_resource(search());
        let role = BuiltinRole::SearchIndexDataContributor;

        let mut created = 0;
        for _ in 0..5 {
            let grant = ensure_grant(&cp, PRINCIPAL, PrincipalType::User, role, &search())
                .await
                .unwrap();
            if !grant.preexisting {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(cp.assignment_count(PRINCIPAL, role, &search()), 1);
        assert_eq!(cp.calls(FakeOp::CreateRoleAssignment), 1);
    }

    #[tokio::test]
    async fn test_inherited_assignment_counts() {
        let mut mock = MockCloudControlPlane::new();
        mock.expect_list_role_assignments()
            .times(1)
            .returning(|_, principal| {
                Ok(vec![RoleAssignment {
                    id: "rg-level".into(),
                    scope: format!("/subscriptions/{SUB}/resourceGroups/rg-km"),
                    role_definition_id: BuiltinRole::SearchIndexDataContributor.definition_id(SUB),
                    principal_id: principal.to_string(),
                }])
            });
        mock.expect_create_role_assignment().never();

        let grant = ensure_grant(
            &mock,
            PRINCIPAL,
            PrincipalType::User,
            BuiltinRole::SearchIndexDataContributor,
            &search(),
        )
        .await
        .unwrap();
        assert!(grant.preexisting);
        assert_eq!(grant.assignment_id.as_deref(), Some("rg-level"));
    }

    #[tokio::test]
    async fn test_create_race_is_preexisting() {
        let mut mock = MockCloudControlPlane::new();
        mock.expect_list_role_assignments()
            .returning(|_, _| Ok(vec![]));
        mock.expect_create_role_assignment()
            .with(always(), always(), always(), always())
            .times(1)
            .returning(|_, _, _, _| {
                Err(ArmError::AlreadyExists {
                    message: "RoleAssignmentExists".into(),
                })
            });

        let grant = ensure_grant(
            &mock,
            PRINCIPAL,
            PrincipalType::ServicePrincipal,
            BuiltinRole::CognitiveServicesUser,
            &search(),
        )
        .await
        .unwrap();
        assert!(grant.preexisting);
    }

    /// Created but never visible within the wait budget
    async fn unpropagated(req: &GrantRequirement) -> (GrantStatus, GrantPhase) {
        let cp = FakeControlPlane::new()
            .with_closed_resource(search())
            .with_propagation_delay(100);
        ensure_grant(&cp, PRINCIPAL, PrincipalType::User, req.role, &search())
            .await
            .unwrap();
        let grantor = RoleGrantor::new(
            &cp,
            PRINCIPAL,
            PrincipalType::User,
            RetryPolicy::from_secs(3, &[5]),
        );

        let mut phase = GrantPhase::default();
        let status = grantor.await_propagation(req, &search(), &mut phase).await;
        assert_eq!(cp.calls(FakeOp::ListRoleAssignments), 1 + 3);
        (status, phase)
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_timeout_warns_by_default() {
        let req = GrantRequirement::required(BuiltinRole::SearchIndexDataContributor, ResourceSlot::Search)
            .awaiting_propagation();

        let (status, phase) = unpropagated(&req).await;

        assert_eq!(status, GrantStatus::PropagationTimedOut);
        assert!(phase.is_satisfied());
        assert_eq!(phase.warnings.len(), 1);
        assert!(phase.warnings[0].contains("did not propagate"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_propagation_timeout_fails_the_phase() {
        let req = GrantRequirement::required(BuiltinRole::SearchIndexDataContributor, ResourceSlot::Search)
            .awaiting_propagation()
            .failing_on_timeout();

        let (status, phase) = unpropagated(&req).await;

        assert_eq!(status, GrantStatus::PropagationTimedOut);
        assert!(!phase.is_satisfied());
        assert!(phase.warnings.is_empty());
        let classes: Vec<_> = phase.errors.iter().map(|e| e.class()).collect();
        assert_eq!(classes, ["propagation timeout"]);
    }

    #[test]
    fn test_default_plan_gating() {
        let plan = default_grant_plan();
        assert_eq!(plan.len(), 5);
        assert_eq!(
            plan.iter().filter(|r| r.gating == Gating::Required).count(),
            3
        );
        assert!(
            plan.iter()
                .filter(|r| r.await_propagation)
                .all(|r| r.gating == Gating::Required)
        );
    }
}
