//! Built-in roles and role grants

use crate::resource_ref::ResourceRef;
use serde::{Deserialize, Serialize};

/// Azure built-in roles granted by km-provision
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
pub enum BuiltinRole {
    #[strum(serialize = "Search Index Data Contributor")]
    SearchIndexDataContributor,
    #[strum(serialize = "Search Service Contributor")]
    SearchServiceContributor,
    #[strum(serialize = "Storage Blob Data Contributor")]
    StorageBlobDataContributor,
    #[strum(serialize = "Cognitive Services OpenAI User")]
    CognitiveServicesOpenAiUser,
    #[strum(serialize = "Cognitive Services User")]
    CognitiveServicesUser,
}

impl BuiltinRole {
    /// Role definition GUID, identical in every subscription
    pub fn definition_guid(self) -> &'static str {
        match self {
            BuiltinRole::SearchIndexDataContributor => "8ebe5a00-799e-43f5-93ac-243d3dce84a7",
            BuiltinRole::SearchServiceContributor => "7ca78c08-252a-4471-8644-bb5ff32d4ba0",
            BuiltinRole::StorageBlobDataContributor => "ba92f5b4-2d11-453d-a403-e96b0029c9fe",
            BuiltinRole::CognitiveServicesOpenAiUser => "5e0bd9bd-7b93-4f28-af87-19fc36ad61bd",
            BuiltinRole::CognitiveServicesUser => "a97b65f3-24c7-4388-baec-2e87135dc908",
        }
    }

    /// Fully-qualified role definition id within a subscription
    pub fn definition_id(self, subscription_id: &str) -> String {
        format!(
            "/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions/{}",
            subscription_id,
            self.definition_guid()
        )
    }

    /// Whether a role definition id (any scope form) refers to this role
    pub fn matches_definition_id(self, definition_id: &str) -> bool {
        definition_id
            .rsplit('/')
            .next()
            .is_some_and(|guid| guid.eq_ignore_ascii_case(self.definition_guid()))
    }
}

/// Kind of principal a role is assigned to
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum PrincipalType {
    #[default]
    User,
    ServicePrincipal,
}

/// Result of ensuring a (principal, role, scope) grant
///
/// Grants are never deleted by km-provision; only network exposure is rolled
/// back after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub principal_id: String,
    pub role: BuiltinRole,
    pub scope: ResourceRef,
    /// The grant existed before this call
    pub preexisting: bool,
    /// ARM id of the role assignment, when known
    pub assignment_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_definition_guids_are_unique_uuids() {
        let guids: Vec<_> = BuiltinRole::iter().map(|r| r.definition_guid()).collect();
        for guid in &guids {
            assert!(uuid::Uuid::parse_str(guid).is_ok(), "{guid} is not a uuid");
        }
        let mut deduped = guids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), guids.len());
    }

    #[test]
    fn test_matches_definition_id_ignores_case_and_scope() {
        let role = BuiltinRole::StorageBlobDataContributor;
        assert!(role.matches_definition_id(&role.definition_id("sub")));
        assert!(role.matches_definition_id(
            "/providers/Microsoft.Authorization/roleDefinitions/BA92F5B4-2D11-453D-A403-E96B0029C9FE"
        ));
        assert!(!role.matches_definition_id(
            &BuiltinRole::CognitiveServicesUser.definition_id("sub")
        ));
    }

    #[test]
    fn test_role_display_names() {
        assert_eq!(
            BuiltinRole::CognitiveServicesOpenAiUser.to_string(),
            "Cognitive Services OpenAI User"
        );
        assert_eq!(
            "Search Index Data Contributor".parse::<BuiltinRole>().unwrap(),
            BuiltinRole::SearchIndexDataContributor
        );
    }
}
