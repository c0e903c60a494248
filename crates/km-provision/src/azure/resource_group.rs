//! Resource group deletion and soft-deleted account purge

use super::ArmClient;
use super::error::ArmResult;
use super::network::api_version;
use km_provision_common::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

const RESOURCE_GROUP_API_VERSION: &str = "2021-04-01";

/// A soft-deleted Cognitive Services account awaiting purge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedAccount {
    /// Full ARM id under `.../locations/{location}/resourceGroups/{rg}/deletedAccounts/{name}`
    pub id: String,
    pub name: String,
    pub location: String,
    /// Resource group the account lived in before deletion
    pub resource_group: Option<String>,
}

impl DeletedAccount {
    fn from_value(value: &Value) -> Option<Self> {
        let id = value["id"].as_str()?.to_string();
        let segments: Vec<&str> = id.split('/').collect();
        let after = |key: &str| {
            segments
                .iter()
                .position(|s| s.eq_ignore_ascii_case(key))
                .and_then(|i| segments.get(i + 1))
                .map(|s| s.to_string())
        };

        Some(Self {
            name: value["name"]
                .as_str()
                .map(str::to_string)
                .or_else(|| segments.last().map(|s| s.to_string()))?,
            location: value["location"]
                .as_str()
                .map(str::to_string)
                .or_else(|| after("locations"))?,
            resource_group: after("resourceGroups"),
            id,
        })
    }
}

fn resource_group_path(subscription_id: &str, resource_group: &str) -> String {
    format!("/subscriptions/{subscription_id}/resourcegroups/{resource_group}")
}

impl ArmClient {
    /// Check whether a resource group exists
    pub async fn resource_group_exists(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> ArmResult<bool> {
        self.exists(
            &resource_group_path(subscription_id, resource_group),
            RESOURCE_GROUP_API_VERSION,
        )
        .await
    }

    /// Start deleting a resource group
    ///
    /// Returns once ARM accepted the request; completion is observed by
    /// polling [`resource_group_exists`](Self::resource_group_exists).
    pub async fn delete_resource_group(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> ArmResult<()> {
        let status = self
            .delete_no_wait(
                &resource_group_path(subscription_id, resource_group),
                RESOURCE_GROUP_API_VERSION,
            )
            .await?;
        info!(resource_group, status, "Resource group deletion requested");
        Ok(())
    }

    /// List soft-deleted Cognitive Services accounts in a subscription
    pub async fn list_deleted_accounts(&self, subscription_id: &str) -> ArmResult<Vec<DeletedAccount>> {
        let items = self
            .list(
                &format!(
                    "/subscriptions/{subscription_id}/providers/Microsoft.CognitiveServices/deletedAccounts"
                ),
                api_version(ResourceKind::AiServiceAccount),
            )
            .await?;
        let accounts: Vec<_> = items.iter().filter_map(DeletedAccount::from_value).collect();
        debug!(subscription_id, count = accounts.len(), "Listed soft-deleted accounts");
        Ok(accounts)
    }

    /// Permanently remove a soft-deleted account
    pub async fn purge_deleted_account(&self, account: &DeletedAccount) -> ArmResult<()> {
        self.delete(&account.id, api_version(ResourceKind::AiServiceAccount))
            .await?;
        info!(account = %account.name, location = %account.location, "Purged soft-deleted account");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::ArmContext;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SUB: &str = "00000000-0000-0000-0000-000000000001";

    fn client(server: &MockServer) -> ArmClient {
        ArmClient::from_context(&ArmContext::with_static_token(&server.uri(), "fake-token"))
    }

    #[test]
    fn deleted_account_from_id() {
        let value = json!({
            "id": format!("/subscriptions/{SUB}/providers/Microsoft.CognitiveServices/locations/eastus/resourceGroups/rg-km/deletedAccounts/km-ai"),
        });
        let account = DeletedAccount::from_value(&value).unwrap();
        assert_eq!(account.name, "km-ai");
        assert_eq!(account.location, "eastus");
        assert_eq!(account.resource_group.as_deref(), Some("rg-km"));
    }

    #[tokio::test]
    async fn resource_group_exists_uses_head() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path(resource_group_path(SUB, "rg-present")))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path(resource_group_path(SUB, "rg-gone")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let arm = client(&server);
        assert!(arm.resource_group_exists(SUB, "rg-present").await.unwrap());
        assert!(!arm.resource_group_exists(SUB, "rg-gone").await.unwrap());
    }

    #[tokio::test]
    async fn delete_resource_group_does_not_follow_operation() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(resource_group_path(SUB, "rg-km")))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("Location", format!("{}/operationresults/1", server.uri())),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operationresults/1"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        client(&server).delete_resource_group(SUB, "rg-km").await.unwrap();
    }
}
