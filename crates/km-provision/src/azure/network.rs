//! Public network access and default network action per resource kind

use super::ArmClient;
use super::error::{ArmError, ArmResult};
use km_provision_common::{DefaultAction, ExposureConfig, ResourceKind, ResourceRef};
use serde_json::{Value, json};
use tracing::{debug, info};

/// ARM api-version used for each resource kind
pub fn api_version(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::ObjectStore => "2023-05-01",
        ResourceKind::SearchService => "2023-11-01",
        ResourceKind::DocumentDatabase => "2024-05-15",
        ResourceKind::RelationalDatabase => "2023-08-01-preview",
        ResourceKind::AiServiceAccount => "2024-10-01",
    }
}

/// Wire value of `publicNetworkAccess` for a kind
///
/// Search is the only provider that uses lower-case values.
fn public_access_value(kind: ResourceKind, enabled: bool) -> &'static str {
    match (kind, enabled) {
        (ResourceKind::SearchService, true) => "enabled",
        (ResourceKind::SearchService, false) => "disabled",
        (_, true) => "Enabled",
        (_, false) => "Disabled",
    }
}

/// Read the exposure attributes out of a resource body
pub(crate) fn parse_exposure(kind: ResourceKind, body: &Value) -> ExposureConfig {
    let props = &body["properties"];

    // Providers omit the flag when it has never been set; the platform default is enabled.
    let public_access_enabled = props["publicNetworkAccess"]
        .as_str()
        .is_none_or(|v| v.eq_ignore_ascii_case("enabled"));

    let default_action = kind.exposure_profile().default_action.then(|| {
        match props["networkAcls"]["defaultAction"].as_str() {
            Some(v) if v.eq_ignore_ascii_case("deny") => DefaultAction::Deny,
            _ => DefaultAction::Allow,
        }
    });

    ExposureConfig {
        public_access_enabled,
        default_action,
    }
}

impl ArmClient {
    /// Check whether a resource exists
    pub async fn resource_exists(&self, resource: &ResourceRef) -> ArmResult<bool> {
        match self
            .get(&resource.id(), api_version(resource.kind()))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read the current exposure of a resource
    pub async fn get_exposure(&self, resource: &ResourceRef) -> ArmResult<ExposureConfig> {
        let body = self
            .get(&resource.id(), api_version(resource.kind()))
            .await?;
        let exposure = parse_exposure(resource.kind(), &body);
        debug!(
            resource = %resource,
            public_access = exposure.public_access_enabled,
            default_action = ?exposure.default_action,
            "Read exposure"
        );
        Ok(exposure)
    }

    /// Enable or disable public network access
    pub async fn set_public_access(&self, resource: &ResourceRef, enabled: bool) -> ArmResult<()> {
        let body = json!({
            "properties": {
                "publicNetworkAccess": public_access_value(resource.kind(), enabled),
            }
        });
        self.patch(&resource.id(), api_version(resource.kind()), &body)
            .await?;
        info!(resource = %resource, enabled, "Set public network access");
        Ok(())
    }

    /// Set the default network action, preserving the rest of `networkAcls`
    pub async fn set_default_action(
        &self,
        resource: &ResourceRef,
        action: DefaultAction,
    ) -> ArmResult<()> {
        if !resource.kind().exposure_profile().default_action {
            return Err(ArmError::Sdk {
                code: None,
                message: format!("{} has no default network action", resource.kind()),
            });
        }

        let api = api_version(resource.kind());
        let current = self.get(&resource.id(), api).await?;
        let mut acls = match &current["properties"]["networkAcls"] {
            Value::Object(map) => Value::Object(map.clone()),
            _ => json!({}),
        };
        acls["defaultAction"] = json!(action.as_ref());

        let body = json!({ "properties": { "networkAcls": acls } });
        self.patch(&resource.id(), api, &body).await?;
        info!(resource = %resource, action = %action, "Set default network action");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::ArmContext;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SUB: &str = "00000000-0000-0000-0000-000000000001";

    fn client(server: &MockServer) -> ArmClient {
        ArmClient::from_context(&ArmContext::with_static_token(&server.uri(), "fake-token"))
            .with_operation_polling(vec![Duration::from_millis(1)], 3)
    }

    fn storage() -> ResourceRef {
        ResourceRef::new(ResourceKind::ObjectStore, "kmstore", "rg-km", SUB)
    }

    #[test]
    fn parse_exposure_defaults() {
        let exposure = parse_exposure(ResourceKind::ObjectStore, &json!({"properties": {}}));
        assert!(exposure.public_access_enabled);
        assert_eq!(exposure.default_action, Some(DefaultAction::Allow));

        let exposure = parse_exposure(
            ResourceKind::SearchService,
            &json!({"properties": {"publicNetworkAccess": "disabled"}}),
        );
        assert!(!exposure.public_access_enabled);
        assert_eq!(exposure.default_action, None);
    }

    #[test]
    fn parse_exposure_locked_down_account() {
        let body = json!({
            "properties": {
                "publicNetworkAccess": "Disabled",
                "networkAcls": {"defaultAction": "Deny", "ipRules": []}
            }
        });
        let exposure = parse_exposure(ResourceKind::AiServiceAccount, &body);
        assert!(!exposure.public_access_enabled);
        assert_eq!(exposure.default_action, Some(DefaultAction::Deny));
    }

    #[test]
    fn search_uses_lowercase_flag() {
        assert_eq!(public_access_value(ResourceKind::SearchService, true), "enabled");
        assert_eq!(public_access_value(ResourceKind::ObjectStore, false), "Disabled");
    }

    #[tokio::test]
    async fn get_exposure_reads_resource() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(storage().id()))
            .and(query_param("api-version", "2023-05-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {
                    "publicNetworkAccess": "Disabled",
                    "networkAcls": {"defaultAction": "Deny"}
                }
            })))
            .mount(&server)
            .await;

        let exposure = client(&server).get_exposure(&storage()).await.unwrap();
        assert!(!exposure.public_access_enabled);
        assert_eq!(exposure.default_action, Some(DefaultAction::Deny));
    }

    #[tokio::test]
    async fn set_default_action_preserves_other_acl_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(storage().id()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {
                    "networkAcls": {"defaultAction": "Deny", "bypass": "AzureServices"}
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(storage().id()))
            .and(body_partial_json(json!({
                "properties": {
                    "networkAcls": {"defaultAction": "Allow", "bypass": "AzureServices"}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .set_default_action(&storage(), DefaultAction::Allow)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn set_default_action_rejects_kinds_without_knob() {
        let server = MockServer::start().await;
        let search = ResourceRef::new(ResourceKind::SearchService, "km-search", "rg", SUB);
        let err = client(&server)
            .set_default_action(&search, DefaultAction::Allow)
            .await
            .unwrap_err();
        assert!(matches!(err, ArmError::Sdk { .. }));
    }

    #[tokio::test]
    async fn resource_exists_maps_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(storage().id()))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "ResourceNotFound", "message": "missing"}
            })))
            .mount(&server)
            .await;

        assert!(!client(&server).resource_exists(&storage()).await.unwrap());
    }
}
