//! Canonical references to Azure resources

use crate::resource_kind::ResourceKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from parsing an ARM resource id
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceIdError {
    /// Id does not follow `/subscriptions/{sub}/resourceGroups/{rg}/providers/{type}/{name}`
    #[error("'{0}' is not an ARM resource id")]
    Malformed(String),

    /// Id points at a different resource type than expected
    #[error("expected a {expected} resource id, got provider type '{actual}'")]
    WrongType {
        expected: &'static str,
        actual: String,
    },

    /// Subscription segment is not a GUID
    #[error("subscription '{0}' is not a GUID")]
    InvalidSubscription(String),

    /// Name segment violates the naming rules for the kind
    #[error("resource name '{name}' {reason}")]
    InvalidName { name: String, reason: String },
}

/// A resolved reference to a managed resource
///
/// Immutable once resolved: all fields are private and only readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    kind: ResourceKind,
    name: String,
    resource_group: String,
    subscription_id: String,
}

impl ResourceRef {
    /// Create a reference from its parts
    pub fn new(
        kind: ResourceKind,
        name: impl Into<String>,
        resource_group: impl Into<String>,
        subscription_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            resource_group: resource_group.into(),
            subscription_id: subscription_id.into(),
        }
    }

    /// Parse a full ARM resource id for the given kind
    pub fn parse_id(kind: ResourceKind, id: &str) -> Result<Self, ResourceIdError> {
        let malformed = || ResourceIdError::Malformed(id.to_string());
        let segments: Vec<&str> = id.trim_end_matches('/').split('/').collect();

        // ["", "subscriptions", sub, "resourceGroups", rg, "providers", ns, type, name]
        if segments.len() != 9 || !segments[0].is_empty() {
            return Err(malformed());
        }
        if !segments[1].eq_ignore_ascii_case("subscriptions")
            || !segments[3].eq_ignore_ascii_case("resourceGroups")
            || !segments[5].eq_ignore_ascii_case("providers")
        {
            return Err(malformed());
        }

        let subscription_id = segments[2];
        if uuid::Uuid::parse_str(subscription_id).is_err() {
            return Err(ResourceIdError::InvalidSubscription(
                subscription_id.to_string(),
            ));
        }

        let resource_group = segments[4];
        if resource_group.is_empty() {
            return Err(malformed());
        }

        let arm_type = format!("{}/{}", segments[6], segments[7]);
        if !arm_type.eq_ignore_ascii_case(kind.arm_type()) {
            return Err(ResourceIdError::WrongType {
                expected: kind.arm_type(),
                actual: arm_type,
            });
        }

        let name = segments[8];
        kind.validate_name(name)
            .map_err(|reason| ResourceIdError::InvalidName {
                name: name.to_string(),
                reason,
            })?;

        Ok(Self::new(kind, name, resource_group, subscription_id))
    }

    /// Resource kind
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Resource name (last id segment)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource group containing the resource
    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    /// Subscription containing the resource
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Canonical ARM resource id
    pub fn id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}",
            self.subscription_id,
            self.resource_group,
            self.kind.arm_type(),
            self.name
        )
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUB: &str = "00000000-1111-2222-3333-444444444444";

    #[test]
    fn test_id_round_trip() {
        let r = ResourceRef::new(ResourceKind::AiServiceAccount, "km-ai", "rg-km", SUB);
        let parsed = ResourceRef::parse_id(ResourceKind::AiServiceAccount, &r.id()).unwrap();
        assert_eq!(parsed, r);
    }

    #[test]
    fn test_parse_is_case_insensitive_on_fixed_segments() {
        let id = format!(
            "/SUBSCRIPTIONS/{SUB}/resourcegroups/rg-km/providers/microsoft.cognitiveservices/accounts/km-cu"
        );
        let r = ResourceRef::parse_id(ResourceKind::AiServiceAccount, &id).unwrap();
        assert_eq!(r.name(), "km-cu");
        assert_eq!(r.resource_group(), "rg-km");
        assert_eq!(r.subscription_id(), SUB);
    }

    #[test]
    fn test_parse_rejects_wrong_provider() {
        let id = format!(
            "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/kmstore"
        );
        let err = ResourceRef::parse_id(ResourceKind::AiServiceAccount, &id).unwrap_err();
        assert!(matches!(err, ResourceIdError::WrongType { .. }));
    }

    #[test]
    fn test_parse_rejects_bad_subscription() {
        let id =
            "/subscriptions/not-a-guid/resourceGroups/rg/providers/Microsoft.CognitiveServices/accounts/km";
        let err = ResourceRef::parse_id(ResourceKind::AiServiceAccount, id).unwrap_err();
        assert!(matches!(err, ResourceIdError::InvalidSubscription(_)));
    }

    #[test]
    fn test_parse_rejects_truncated_id() {
        let err = ResourceRef::parse_id(ResourceKind::AiServiceAccount, "km-ai").unwrap_err();
        assert!(matches!(err, ResourceIdError::Malformed(_)));
    }

    #[test]
    fn test_display() {
        let r = ResourceRef::new(ResourceKind::SearchService, "km-search", "rg", SUB);
        assert_eq!(r.to_string(), "SearchService 'km-search'");
    }
}
