//! Role assignment listing and creation

use super::ArmClient;
use super::error::ArmResult;
use km_provision_common::{BuiltinRole, PrincipalType, ResourceRef};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

const AUTHORIZATION_API_VERSION: &str = "2022-04-01";

/// A role assignment as reported by ARM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Full ARM id of the assignment
    pub id: String,
    /// Scope the assignment was made at
    pub scope: String,
    pub role_definition_id: String,
    pub principal_id: String,
}

impl RoleAssignment {
    /// Whether this assignment grants `role` to `principal_id` on `scope`.
    ///
    /// Assignments made at an ancestor scope (resource group, subscription)
    /// are inherited and count as equivalent.
    pub fn grants(&self, principal_id: &str, role: BuiltinRole, scope: &ResourceRef) -> bool {
        let target = scope.id().to_ascii_lowercase();
        let own = self.scope.trim_end_matches('/').to_ascii_lowercase();
        let covers = target == own || target.starts_with(&format!("{own}/"));

        covers
            && self.principal_id.eq_ignore_ascii_case(principal_id)
            && role.matches_definition_id(&self.role_definition_id)
    }

    fn from_value(value: &Value) -> Option<Self> {
        let props = &value["properties"];
        Some(Self {
            id: value["id"].as_str()?.to_string(),
            scope: props["scope"].as_str()?.to_string(),
            role_definition_id: props["roleDefinitionId"].as_str()?.to_string(),
            principal_id: props["principalId"].as_str()?.to_string(),
        })
    }
}

impl ArmClient {
    /// List role assignments for a principal that apply at a scope
    pub async fn list_role_assignments(
        &self,
        scope: &ResourceRef,
        principal_id: &str,
    ) -> ArmResult<Vec<RoleAssignment>> {
        let filter = format!("principalId eq '{principal_id}'");
        let url = self.url_with_query(
            &format!("{}/providers/Microsoft.Authorization/roleAssignments", scope.id()),
            AUTHORIZATION_API_VERSION,
            &[("$filter", filter.as_str())],
        )?;
        let items = self.list_url(url).await?;
        let assignments: Vec<_> = items.iter().filter_map(RoleAssignment::from_value).collect();
        debug!(scope = %scope, principal_id, count = assignments.len(), "Listed role assignments");
        Ok(assignments)
    }

    /// Create a role assignment with a fresh assignment name
    ///
    /// ARM answers 409 `RoleAssignmentExists` when an identical assignment is
    /// already present; that surfaces as `ArmError::AlreadyExists`.
    pub async fn create_role_assignment(
        &self,
        scope: &ResourceRef,
        principal_id: &str,
        role: BuiltinRole,
        principal_type: PrincipalType,
    ) -> ArmResult<RoleAssignment> {
        let assignment_name = uuid::Uuid::new_v4();
        let path = format!(
            "{}/providers/Microsoft.Authorization/roleAssignments/{}",
            scope.id(),
            assignment_name
        );
        let body = json!({
            "properties": {
                "roleDefinitionId": role.definition_id(scope.subscription_id()),
                "principalId": principal_id,
                "principalType": principal_type.as_ref(),
            }
        });

        let created = self.put(&path, AUTHORIZATION_API_VERSION, &body).await?;
        info!(scope = %scope, role = %role, principal_id, "Created role assignment");

        Ok(RoleAssignment::from_value(&created).unwrap_or_else(|| RoleAssignment {
            id: path,
            scope: scope.id(),
            role_definition_id: role.definition_id(scope.subscription_id()),
            principal_id: principal_id.to_string(),
        }))
    }
}
