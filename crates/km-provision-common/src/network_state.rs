//! Exposure snapshots and firewall rules

use crate::resource_ref::ResourceRef;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Default network action applied to traffic not matched by any rule
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
)]
#[strum(ascii_case_insensitive)]
pub enum DefaultAction {
    Allow,
    Deny,
}

/// Current exposure attributes of a resource, as read from the control plane
///
/// `default_action` is `None` for kinds without a default-action knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureConfig {
    pub public_access_enabled: bool,
    pub default_action: Option<DefaultAction>,
}

impl ExposureConfig {
    /// Configuration a resource is elevated to
    pub fn reachable(default_action_supported: bool) -> Self {
        Self {
            public_access_enabled: true,
            default_action: default_action_supported.then_some(DefaultAction::Allow),
        }
    }

    /// Private-only configuration: public access off, default deny
    pub fn closed(default_action_supported: bool) -> Self {
        Self {
            public_access_enabled: false,
            default_action: default_action_supported.then_some(DefaultAction::Deny),
        }
    }
}

/// An inbound IPv4 firewall rule on a relational database server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub name: String,
    pub start_ip: Ipv4Addr,
    pub end_ip: Ipv4Addr,
}

impl FirewallRule {
    /// Create a rule covering the entire IPv4 range
    pub fn full_range(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_ip: Ipv4Addr::UNSPECIFIED,
            end_ip: Ipv4Addr::BROADCAST,
        }
    }

    /// Whether this rule admits every IPv4 address
    pub fn is_full_range(&self) -> bool {
        self.start_ip == Ipv4Addr::UNSPECIFIED && self.end_ip == Ipv4Addr::BROADCAST
    }
}

/// Exposure state of one resource captured before elevation
///
/// Built once at elevation time and consumed once by the restorer. The only
/// later change is the `restored` mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    resource: ResourceRef,
    public_access_enabled: bool,
    default_action: Option<DefaultAction>,
    extra_temporary_rule_created: bool,
    temporary_rule_name: Option<String>,
    #[serde(default)]
    restored: bool,
}

impl NetworkState {
    /// Snapshot the captured exposure of a resource
    pub fn captured(resource: ResourceRef, exposure: ExposureConfig) -> Self {
        Self {
            resource,
            public_access_enabled: exposure.public_access_enabled,
            default_action: exposure.default_action,
            extra_temporary_rule_created: false,
            temporary_rule_name: None,
            restored: false,
        }
    }

    /// Record that this run owns the named temporary rule
    ///
    /// Only used while the elevator builds the state, before it is registered.
    pub fn with_temporary_rule(mut self, rule_name: impl Into<String>) -> Self {
        self.extra_temporary_rule_created = true;
        self.temporary_rule_name = Some(rule_name.into());
        self
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    pub fn public_access_enabled(&self) -> bool {
        self.public_access_enabled
    }

    pub fn default_action(&self) -> Option<DefaultAction> {
        self.default_action
    }

    pub fn extra_temporary_rule_created(&self) -> bool {
        self.extra_temporary_rule_created
    }

    /// Name of the temporary rule this run owns, if any
    pub fn temporary_rule_name(&self) -> Option<&str> {
        self.temporary_rule_name.as_deref()
    }

    /// Exposure as captured, for comparison against the live configuration
    pub fn exposure(&self) -> ExposureConfig {
        ExposureConfig {
            public_access_enabled: self.public_access_enabled,
            default_action: self.default_action,
        }
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    /// Mark the snapshot as restored
    pub fn mark_restored(&mut self) {
        self.restored = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_kind::ResourceKind;

    fn sql_ref() -> ResourceRef {
        ResourceRef::new(
            ResourceKind::RelationalDatabase,
            "km-sql",
            "rg",
            "00000000-0000-0000-0000-000000000000",
        )
    }

    #[test]
    fn test_full_range_rule() {
        assert!(FirewallRule::full_range("x").is_full_range());
        let azure_services = FirewallRule {
            name: "AllowAllWindowsAzureIps".into(),
            start_ip: Ipv4Addr::UNSPECIFIED,
            end_ip: Ipv4Addr::UNSPECIFIED,
        };
        assert!(!azure_services.is_full_range());
    }

    #[test]
    fn test_captured_state_owns_no_rule() {
        let state = NetworkState::captured(
            sql_ref(),
            ExposureConfig {
                public_access_enabled: false,
                default_action: None,
            },
        );
        assert!(!state.extra_temporary_rule_created());
        assert_eq!(state.temporary_rule_name(), None);
        assert!(!state.is_restored());
    }

    #[test]
    fn test_with_temporary_rule() {
        let state = NetworkState::captured(sql_ref(), ExposureConfig::reachable(false))
            .with_temporary_rule("tmp");
        assert!(state.extra_temporary_rule_created());
        assert_eq!(state.temporary_rule_name(), Some("tmp"));
    }

    #[test]
    fn test_reachable_config() {
        assert_eq!(
            ExposureConfig::reachable(true).default_action,
            Some(DefaultAction::Allow)
        );
        assert_eq!(ExposureConfig::reachable(false).default_action, None);
    }

    #[test]
    fn test_serde_defaults_restored_flag() {
        let json = serde_json::json!({
            "resource": sql_ref(),
            "public_access_enabled": false,
            "default_action": null,
            "extra_temporary_rule_created": true,
            "temporary_rule_name": "tmp"
        });
        let state: NetworkState = serde_json::from_value(json).unwrap();
        assert!(!state.is_restored());
        assert!(state.extra_temporary_rule_created());
    }
}
