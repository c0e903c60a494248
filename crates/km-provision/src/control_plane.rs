//! Cloud control-plane capability
//!
//! Every component that reads or mutates Azure resources takes a
//! `CloudControlPlane` instead of a concrete client, so the orchestration
//! logic runs unchanged against `ArmClient` or an in-memory fake.

use crate::azure::{ArmClient, ArmResult, DeletedAccount, RoleAssignment};
use km_provision_common::{
    BuiltinRole, DefaultAction, ExposureConfig, FirewallRule, PrincipalType, ResourceRef,
};

/// Control-plane operations used by the orchestrator.
///
/// All calls are awaited in place by a single task; none of the generic
/// futures are spawned.
#[allow(async_fn_in_trait)] // Futures are awaited in place, never spawned
#[cfg_attr(test, mockall::automock)]
pub trait CloudControlPlane: Send + Sync {
    /// Whether the resource exists
    async fn resource_exists(&self, resource: &ResourceRef) -> ArmResult<bool>;

    /// Read the current exposure attributes
    async fn get_exposure(&self, resource: &ResourceRef) -> ArmResult<ExposureConfig>;

    /// Enable or disable public network access
    async fn set_public_access(&self, resource: &ResourceRef, enabled: bool) -> ArmResult<()>;

    /// Set the default network action
    async fn set_default_action(
        &self,
        resource: &ResourceRef,
        action: DefaultAction,
    ) -> ArmResult<()>;

    /// List inbound firewall rules of a relational database server
    async fn list_firewall_rules(&self, server: &ResourceRef) -> ArmResult<Vec<FirewallRule>>;

    /// Create an inbound firewall rule
    async fn create_firewall_rule(
        &self,
        server: &ResourceRef,
        rule: &FirewallRule,
    ) -> ArmResult<()>;

    /// Delete an inbound firewall rule
    async fn delete_firewall_rule(&self, server: &ResourceRef, rule_name: &str) -> ArmResult<()>;

    /// List role assignments of a principal that apply at a scope
    async fn list_role_assignments(
        &self,
        scope: &ResourceRef,
        principal_id: &str,
    ) -> ArmResult<Vec<RoleAssignment>>;

    /// Create a role assignment
    async fn create_role_assignment(
        &self,
        scope: &ResourceRef,
        principal_id: &str,
        role: BuiltinRole,
        principal_type: PrincipalType,
    ) -> ArmResult<RoleAssignment>;

    /// Whether a resource group exists
    async fn resource_group_exists(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> ArmResult<bool>;

    /// Request deletion of a resource group
    async fn delete_resource_group(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> ArmResult<()>;

    /// List soft-deleted AI service accounts in a subscription
    async fn list_deleted_accounts(&self, subscription_id: &str) -> ArmResult<Vec<DeletedAccount>>;

    /// Purge a soft-deleted AI service account
    async fn purge_deleted_account(&self, account: &DeletedAccount) -> ArmResult<()>;
}

impl CloudControlPlane for ArmClient {
    async fn resource_exists(&self, resource: &ResourceRef) -> ArmResult<bool> {
        ArmClient::resource_exists(self, resource).await
    }

    async fn get_exposure(&self, resource: &ResourceRef) -> ArmResult<ExposureConfig> {
        ArmClient::get_exposure(self, resource).await
    }

    async fn set_public_access(&self, resource: &ResourceRef, enabled: bool) -> ArmResult<()> {
        ArmClient::set_public_access(self, resource, enabled).await
    }

    async fn set_default_action(
        &self,
        resource: &ResourceRef,
        action: DefaultAction,
    ) -> ArmResult<()> {
        ArmClient::set_default_action(self, resource, action).await
    }

    async fn list_firewall_rules(&self, server: &ResourceRef) -> ArmResult<Vec<FirewallRule>> {
        ArmClient::list_firewall_rules(self, server).await
    }

    async fn create_firewall_rule(
        &self,
        server: &ResourceRef,
        rule: &FirewallRule,
    ) -> ArmResult<()> {
        ArmClient::create_firewall_rule(self, server, rule).await
    }

    async fn delete_firewall_rule(&self, server: &ResourceRef, rule_name: &str) -> ArmResult<()> {
        ArmClient::delete_firewall_rule(self, server, rule_name).await
    }

    async fn list_role_assignments(
        &self,
        scope: &ResourceRef,
        principal_id: &str,
    ) -> ArmResult<Vec<RoleAssignment>> {
        ArmClient::list_role_assignments(self, scope, principal_id).await
    }

    async fn create_role_assignment(
        &self,
        scope: &ResourceRef,
        principal_id: &str,
        role: BuiltinRole,
        principal_type: PrincipalType,
    ) -> ArmResult<RoleAssignment> {
        ArmClient::create_role_assignment(self, scope, principal_id, role, principal_type).await
    }

    async fn resource_group_exists(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> ArmResult<bool> {
        ArmClient::resource_group_exists(self, subscription_id, resource_group).await
    }

    async fn delete_resource_group(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> ArmResult<()> {
        ArmClient::delete_resource_group(self, subscription_id, resource_group).await
    }

    async fn list_deleted_accounts(&self, subscription_id: &str) -> ArmResult<Vec<DeletedAccount>> {
        ArmClient::list_deleted_accounts(self, subscription_id).await
    }

    async fn purge_deleted_account(&self, account: &DeletedAccount) -> ArmResult<()> {
        ArmClient::purge_deleted_account(self, account).await
    }
}
