//! In-memory control plane for tests
//!
//! `FakeControlPlane` keeps resource exposure, firewall rules, role
//! assignments and resource groups in memory, counts every call, and can be
//! told to fail specific operations. Eventual consistency is simulated with
//! per-item visibility countdowns.

use crate::azure::{ArmError, ArmResult, DeletedAccount, RoleAssignment};
use crate::control_plane::CloudControlPlane;
use km_provision_common::{
    BuiltinRole, DefaultAction, ExposureConfig, FirewallRule, PrincipalType, ResourceKind,
    ResourceRef,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Control-plane operations, for call counting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum FakeOp {
    ResourceExists,
    GetExposure,
    SetPublicAccess,
    SetDefaultAction,
    ListFirewallRules,
    CreateFirewallRule,
    DeleteFirewallRule,
    ListRoleAssignments,
    CreateRoleAssignment,
    ResourceGroupExists,
    DeleteResourceGroup,
    ListDeletedAccounts,
    PurgeDeletedAccount,
}

impl FakeOp {
    /// Whether the operation changes control-plane state
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            FakeOp::SetPublicAccess
                | FakeOp::SetDefaultAction
                | FakeOp::CreateFirewallRule
                | FakeOp::DeleteFirewallRule
                | FakeOp::CreateRoleAssignment
                | FakeOp::DeleteResourceGroup
                | FakeOp::PurgeDeletedAccount
        )
    }
}

struct InjectedFailure {
    op: FakeOp,
    target: Option<String>,
    remaining: Option<u32>,
}

struct FakeAssignment {
    assignment: RoleAssignment,
    hidden_for: u32,
}

struct FakeResourceGroup {
    polls_until_gone: Option<u32>,
}

struct FakeDeletedAccount {
    account: DeletedAccount,
    subscription_id: String,
    hidden_for: u32,
}

#[derive(Default)]
struct FakeState {
    exposures: BTreeMap<ResourceRef, ExposureConfig>,
    firewall_rules: HashMap<ResourceRef, Vec<FirewallRule>>,
    assignments: Vec<FakeAssignment>,
    resource_groups: HashMap<String, FakeResourceGroup>,
    deleted_accounts: Vec<FakeDeletedAccount>,
    failures: Vec<InjectedFailure>,
    calls: HashMap<FakeOp, usize>,
    propagation_delay: u32,
    deletion_delay: u32,
    soft_delete_delay: u32,
    next_id: u64,
}

impl FakeState {
    fn call(&mut self, op: FakeOp, target: &str) -> ArmResult<()> {
        *self.calls.entry(op).or_default() += 1;

        let hit = self.failures.iter_mut().find(|f| {
            f.op == op
                && f.target.as_deref().is_none_or(|t| t == target)
                && f.remaining.is_none_or(|n| n > 0)
        });
        match hit {
            Some(failure) => {
                if let Some(n) = failure.remaining.as_mut() {
                    *n -= 1;
                }
                Err(ArmError::Sdk {
                    code: Some("InjectedFailure".to_string()),
                    message: format!("injected failure for {op} on '{target}'"),
                })
            }
            None => Ok(()),
        }
    }

    fn exposure_mut(&mut self, resource: &ResourceRef) -> ArmResult<&mut ExposureConfig> {
        self.exposures
            .get_mut(resource)
            .ok_or_else(|| not_found(resource.name()))
    }

    fn add_group(&mut self, resource_group: &str) {
        self.resource_groups
            .entry(resource_group.to_ascii_lowercase())
            .or_insert(FakeResourceGroup {
                polls_until_gone: None,
            });
    }
}

fn not_found(name: &str) -> ArmError {
    ArmError::NotFound {
        message: format!("'{name}' was not found"),
    }
}

/// In-memory `CloudControlPlane`
#[derive(Default)]
pub struct FakeControlPlane {
    state: Mutex<FakeState>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a resource with the given exposure; its resource group is created too
    pub fn with_resource(self, resource: ResourceRef, exposure: ExposureConfig) -> Self {
        {
            let mut state = self.lock();
            state.add_group(resource.resource_group());
            state.exposures.insert(resource, exposure);
        }
        self
    }

    /// Add a resource that is private-only, as provisioned
    pub fn with_closed_resource(self, resource: ResourceRef) -> Self {
        let exposure = ExposureConfig::closed(resource.kind().exposure_profile().default_action);
        self.with_resource(resource, exposure)
    }

    /// Add an existing firewall rule to a server
    pub fn with_firewall_rule(self, server: &ResourceRef, rule: FirewallRule) -> Self {
        self.lock()
            .firewall_rules
            .entry(server.clone())
            .or_default()
            .push(rule);
        self
    }

    /// Add an existing role assignment
    pub fn with_role_assignment(
        self,
        principal_id: &str,
        role: BuiltinRole,
        scope: &ResourceRef,
    ) -> Self {
        {
            let mut state = self.lock();
            state.next_id += 1;
            let id = format!(
                "{}/providers/Microsoft.Authorization/roleAssignments/existing-{}",
                scope.id(),
                state.next_id
            );
            state.assignments.push(FakeAssignment {
                assignment: RoleAssignment {
                    id,
                    scope: scope.id(),
                    role_definition_id: role.definition_id(scope.subscription_id()),
                    principal_id: principal_id.to_string(),
                },
                hidden_for: 0,
            });
        }
        self
    }

    /// New role assignments stay invisible for this many list calls
    pub fn with_propagation_delay(self, list_calls: u32) -> Self {
        self.lock().propagation_delay = list_calls;
        self
    }

    /// A deleted resource group keeps existing for this many existence checks
    pub fn with_deletion_delay(self, polls: u32) -> Self {
        self.lock().deletion_delay = polls;
        self
    }

    /// Soft-deleted accounts stay unlisted for this many list calls
    pub fn with_soft_delete_delay(self, list_calls: u32) -> Self {
        self.lock().soft_delete_delay = list_calls;
        self
    }

    /// Make every call of `op` fail, optionally only for a named target
    pub fn fail(&self, op: FakeOp, target: Option<&str>) {
        self.lock().failures.push(InjectedFailure {
            op,
            target: target.map(str::to_string),
            remaining: None,
        });
    }

    /// Make the next `times` calls of `op` fail
    pub fn fail_times(&self, op: FakeOp, target: Option<&str>, times: u32) {
        self.lock().failures.push(InjectedFailure {
            op,
            target: target.map(str::to_string),
            remaining: Some(times),
        });
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Overwrite a resource's exposure behind the orchestrator's back
    pub fn set_exposure(&self, resource: &ResourceRef, exposure: ExposureConfig) {
        self.lock().exposures.insert(resource.clone(), exposure);
    }

    /// Current exposure of a resource
    pub fn exposure(&self, resource: &ResourceRef) -> Option<ExposureConfig> {
        self.lock().exposures.get(resource).copied()
    }

    /// Current firewall rules of a server
    pub fn firewall_rules(&self, server: &ResourceRef) -> Vec<FirewallRule> {
        self.lock()
            .firewall_rules
            .get(server)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of assignments granting `role` to the principal exactly at `scope`
    pub fn assignment_count(&self, principal_id: &str, role: BuiltinRole, scope: &ResourceRef) -> usize {
        self.lock()
            .assignments
            .iter()
            .filter(|a| {
                a.assignment.scope.eq_ignore_ascii_case(&scope.id())
                    && a.assignment.grants(principal_id, role, scope)
            })
            .count()
    }

    /// Number of calls made to `op`, failed ones included
    pub fn calls(&self, op: FakeOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of calls to mutating operations
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(op, _)| op.is_mutation())
            .map(|(_, n)| n)
            .sum()
    }

    /// Soft-deleted accounts not yet purged, visible or not
    pub fn pending_deleted_accounts(&self) -> Vec<DeletedAccount> {
        self.lock()
            .deleted_accounts
            .iter()
            .map(|d| d.account.clone())
            .collect()
    }
}

impl CloudControlPlane for FakeControlPlane {
    async fn resource_exists(&self, resource: &ResourceRef) -> ArmResult<bool> {
        let mut state = self.lock();
        state.call(FakeOp::ResourceExists, resource.name())?;
        Ok(state.exposures.contains_key(resource))
    }

    async fn get_exposure(&self, resource: &ResourceRef) -> ArmResult<ExposureConfig> {
        let mut state = self.lock();
        state.call(FakeOp::GetExposure, resource.name())?;
        state.exposure_mut(resource).map(|e| *e)
    }

    async fn set_public_access(&self, resource: &ResourceRef, enabled: bool) -> ArmResult<()> {
        let mut state = self.lock();
        state.call(FakeOp::SetPublicAccess, resource.name())?;
        state.exposure_mut(resource)?.public_access_enabled = enabled;
        Ok(())
    }

    async fn set_default_action(
        &self,
        resource: &ResourceRef,
        action: DefaultAction,
    ) -> ArmResult<()> {
        let mut state = self.lock();
        state.call(FakeOp::SetDefaultAction, resource.name())?;
        if !resource.kind().exposure_profile().default_action {
            return Err(ArmError::Sdk {
                code: None,
                message: format!("{} has no default network action", resource.kind()),
            });
        }
        state.exposure_mut(resource)?.default_action = Some(action);
        Ok(())
    }

    async fn list_firewall_rules(&self, server: &ResourceRef) -> ArmResult<Vec<FirewallRule>> {
        let mut state = self.lock();
        state.call(FakeOp::ListFirewallRules, server.name())?;
        state.exposure_mut(server)?;
        Ok(state.firewall_rules.get(server).cloned().unwrap_or_default())
    }

    async fn create_firewall_rule(
        &self,
        server: &ResourceRef,
        rule: &FirewallRule,
    ) -> ArmResult<()> {
        let mut state = self.lock();
        state.call(FakeOp::CreateFirewallRule, server.name())?;
        state.exposure_mut(server)?;
        let rules = state.firewall_rules.entry(server.clone()).or_default();
        rules.retain(|r| r.name != rule.name);
        rules.push(rule.clone());
        Ok(())
    }

    async fn delete_firewall_rule(&self, server: &ResourceRef, rule_name: &str) -> ArmResult<()> {
        let mut state = self.lock();
        state.call(FakeOp::DeleteFirewallRule, server.name())?;
        let rules = state.firewall_rules.entry(server.clone()).or_default();
        let before = rules.len();
        rules.retain(|r| r.name != rule_name);
        if rules.len() == before {
            return Err(not_found(rule_name));
        }
        Ok(())
    }

    async fn list_role_assignments(
        &self,
        scope: &ResourceRef,
        principal_id: &str,
    ) -> ArmResult<Vec<RoleAssignment>> {
        let mut state = self.lock();
        state.call(FakeOp::ListRoleAssignments, scope.name())?;

        let mut visible = Vec::new();
        for entry in state.assignments.iter_mut() {
            if entry.hidden_for > 0 {
                entry.hidden_for -= 1;
                continue;
            }
            let own = entry.assignment.scope.to_ascii_lowercase();
            let target = scope.id().to_ascii_lowercase();
            let applies = target == own || target.starts_with(&format!("{own}/"));
            if applies && entry.assignment.principal_id.eq_ignore_ascii_case(principal_id) {
                visible.push(entry.assignment.clone());
            }
        }
        Ok(visible)
    }

    async fn create_role_assignment(
        &self,
        scope: &ResourceRef,
        principal_id: &str,
        role: BuiltinRole,
        _principal_type: PrincipalType,
    ) -> ArmResult<RoleAssignment> {
        let mut state = self.lock();
        state.call(FakeOp::CreateRoleAssignment, scope.name())?;

        let duplicate = state.assignments.iter().any(|a| {
            a.assignment.scope.eq_ignore_ascii_case(&scope.id())
                && a.assignment.grants(principal_id, role, scope)
        });
        if duplicate {
            return Err(ArmError::AlreadyExists {
                message: "The role assignment already exists.".to_string(),
            });
        }

        state.next_id += 1;
        let assignment = RoleAssignment {
            id: format!(
                "{}/providers/Microsoft.Authorization/roleAssignments/created-{}",
                scope.id(),
                state.next_id
            ),
            scope: scope.id(),
            role_definition_id: role.definition_id(scope.subscription_id()),
            principal_id: principal_id.to_string(),
        };
        let hidden_for = state.propagation_delay;
        state.assignments.push(FakeAssignment {
            assignment: assignment.clone(),
            hidden_for,
        });
        Ok(assignment)
    }

    async fn resource_group_exists(
        &self,
        _subscription_id: &str,
        resource_group: &str,
    ) -> ArmResult<bool> {
        let mut state = self.lock();
        state.call(FakeOp::ResourceGroupExists, resource_group)?;

        let key = resource_group.to_ascii_lowercase();
        match state
            .resource_groups
            .get_mut(&key)
            .map(|g| &mut g.polls_until_gone)
        {
            None => return Ok(false),
            Some(None) => return Ok(true),
            Some(Some(n)) if *n > 0 => {
                *n -= 1;
                return Ok(true);
            }
            Some(Some(_)) => {}
        }

        state.resource_groups.remove(&key);
        Ok(false)
    }

    async fn delete_resource_group(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> ArmResult<()> {
        let mut state = self.lock();
        state.call(FakeOp::DeleteResourceGroup, resource_group)?;

        let key = resource_group.to_ascii_lowercase();
        let deletion_delay = state.deletion_delay;
        match state.resource_groups.get_mut(&key) {
            Some(group) => {
                if group.polls_until_gone.is_none() {
                    group.polls_until_gone = Some(deletion_delay);
                }
            }
            None => return Err(not_found(resource_group)),
        }

        let doomed: Vec<ResourceRef> = state
            .exposures
            .keys()
            .filter(|r| r.resource_group().eq_ignore_ascii_case(resource_group))
            .cloned()
            .collect();
        let soft_delete_delay = state.soft_delete_delay;
        for resource in doomed {
            state.exposures.remove(&resource);
            state.firewall_rules.remove(&resource);
            if resource.kind() == ResourceKind::AiServiceAccount {
                let id = format!(
                    "/subscriptions/{}/providers/Microsoft.CognitiveServices/locations/eastus/resourceGroups/{}/deletedAccounts/{}",
                    subscription_id,
                    resource.resource_group(),
                    resource.name()
                );
                state.deleted_accounts.push(FakeDeletedAccount {
                    account: DeletedAccount {
                        id,
                        name: resource.name().to_string(),
                        location: "eastus".to_string(),
                        resource_group: Some(resource.resource_group().to_string()),
                    },
                    subscription_id: subscription_id.to_string(),
                    hidden_for: soft_delete_delay,
                });
            }
        }
        Ok(())
    }

    async fn list_deleted_accounts(&self, subscription_id: &str) -> ArmResult<Vec<DeletedAccount>> {
        let mut state = self.lock();
        state.call(FakeOp::ListDeletedAccounts, subscription_id)?;

        let mut visible = Vec::new();
        for entry in state.deleted_accounts.iter_mut() {
            if entry.subscription_id != subscription_id {
                continue;
            }
            if entry.hidden_for > 0 {
                entry.hidden_for -= 1;
                continue;
            }
            visible.push(entry.account.clone());
        }
        Ok(visible)
    }

    async fn purge_deleted_account(&self, account: &DeletedAccount) -> ArmResult<()> {
        let mut state = self.lock();
        state.call(FakeOp::PurgeDeletedAccount, &account.name)?;

        let before = state.deleted_accounts.len();
        state
            .deleted_accounts
            .retain(|d| !(d.account.id == account.id && d.hidden_for == 0));
        if state.deleted_accounts.len() == before {
            return Err(not_found(&account.name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUB: &str = "00000000-0000-0000-0000-000000000001";

    fn store() -> ResourceRef {
        ResourceRef::new(ResourceKind::ObjectStore, "kmstore", "rg-km", SUB)
    }

    #[tokio::test]
    async fn test_injected_failure_is_counted_and_limited() {
        let fake = FakeControlPlane::new().with_resource(store(), ExposureConfig::reachable(true));
        fake.fail_times(FakeOp::GetExposure, Some("kmstore"), 1);

        assert!(fake.get_exposure(&store()).await.is_err());
        assert!(fake.get_exposure(&store()).await.is_ok());
        assert_eq!(fake.calls(FakeOp::GetExposure), 2);
        assert_eq!(fake.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_created_assignment_is_hidden_until_propagated() {
        let fake = FakeControlPlane::new().with_propagation_delay(2);
        let role = BuiltinRole::StorageBlobDataContributor;
        fake.create_role_assignment(&store(), "p", role, PrincipalType::User)
            .await
            .unwrap();

        assert!(fake.list_role_assignments(&store(), "p").await.unwrap().is_empty());
        assert!(fake.list_role_assignments(&store(), "p").await.unwrap().is_empty());
        assert_eq!(fake.list_role_assignments(&store(), "p").await.unwrap().len(), 1);
        assert_eq!(fake.assignment_count("p", role, &store()), 1);
    }

    #[tokio::test]
    async fn test_resource_group_deletion_soft_deletes_ai_accounts() {
        let ai = ResourceRef::new(ResourceKind::AiServiceAccount, "km-ai", "rg-km", SUB);
        let fake = FakeControlPlane::new()
            .with_resource(ai, ExposureConfig::reachable(true))
            .with_deletion_delay(1);

        fake.delete_resource_group(SUB, "rg-km").await.unwrap();
        assert!(fake.resource_group_exists(SUB, "rg-km").await.unwrap());
        assert!(!fake.resource_group_exists(SUB, "rg-km").await.unwrap());

        let deleted = fake.list_deleted_accounts(SUB).await.unwrap();
        assert_eq!(deleted.len(), 1);
        fake.purge_deleted_account(&deleted[0]).await.unwrap();
        assert!(fake.pending_deleted_accounts().is_empty());
    }
}
