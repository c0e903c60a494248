//! Managed resource kinds and their exposure knobs
//!
//! Every kind the orchestrator can elevate is listed here together with the
//! network knobs it exposes. The orchestrator dispatches on this table instead
//! of branching on kinds ad hoc.

use serde::{Deserialize, Serialize};

/// Kinds of Azure resources managed by km-provision
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
pub enum ResourceKind {
    /// Storage account holding the sample data container
    ObjectStore,
    /// Search service hosting the vector index
    SearchService,
    /// Document database account
    DocumentDatabase,
    /// Relational database server
    RelationalDatabase,
    /// AI services / content understanding account
    #[strum(serialize = "AIServiceAccount")]
    #[serde(rename = "AIServiceAccount")]
    AiServiceAccount,
}

/// Network knobs a resource kind exposes
///
/// The elevator only touches knobs that are present for the kind, and the
/// restorer only reverts those same knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposureProfile {
    /// Kind has a public network access flag
    pub public_access: bool,
    /// Kind has a default network action (Allow/Deny)
    pub default_action: bool,
    /// Kind needs a wide-open inbound rule to be reachable
    pub temporary_rule: bool,
}

impl ResourceKind {
    /// Exposure knobs for this kind
    pub fn exposure_profile(self) -> ExposureProfile {
        match self {
            ResourceKind::ObjectStore | ResourceKind::AiServiceAccount => ExposureProfile {
                public_access: true,
                default_action: true,
                temporary_rule: false,
            },
            ResourceKind::SearchService | ResourceKind::DocumentDatabase => ExposureProfile {
                public_access: true,
                default_action: false,
                temporary_rule: false,
            },
            ResourceKind::RelationalDatabase => ExposureProfile {
                public_access: true,
                default_action: false,
                temporary_rule: true,
            },
        }
    }

    /// ARM provider namespace and resource type
    pub fn arm_type(self) -> &'static str {
        match self {
            ResourceKind::ObjectStore => "Microsoft.Storage/storageAccounts",
            ResourceKind::SearchService => "Microsoft.Search/searchServices",
            ResourceKind::DocumentDatabase => "Microsoft.DocumentDB/databaseAccounts",
            ResourceKind::RelationalDatabase => "Microsoft.Sql/servers",
            ResourceKind::AiServiceAccount => "Microsoft.CognitiveServices/accounts",
        }
    }

    /// Check a resource name against the Azure naming rules for this kind
    ///
    /// Returns a human-readable reason when the name is rejected.
    pub fn validate_name(self, name: &str) -> Result<(), String> {
        let (min, max) = match self {
            ResourceKind::ObjectStore => (3, 24),
            ResourceKind::SearchService => (2, 60),
            ResourceKind::DocumentDatabase => (3, 44),
            ResourceKind::RelationalDatabase => (1, 63),
            ResourceKind::AiServiceAccount => (2, 64),
        };
        let len = name.chars().count();
        if len < min || len > max {
            return Err(format!("must be {min}-{max} characters, got {len}"));
        }

        match self {
            ResourceKind::ObjectStore => {
                if !name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
                {
                    return Err("only lowercase letters and digits are allowed".into());
                }
            }
            ResourceKind::AiServiceAccount => {
                if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                    return Err("only letters, digits and hyphens are allowed".into());
                }
                if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
                    return Err("must start with a letter or digit".into());
                }
            }
            ResourceKind::SearchService
            | ResourceKind::DocumentDatabase
            | ResourceKind::RelationalDatabase => {
                if !name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                {
                    return Err("only lowercase letters, digits and hyphens are allowed".into());
                }
                if name.starts_with('-') || name.ends_with('-') {
                    return Err("cannot start or end with a hyphen".into());
                }
                if self == ResourceKind::SearchService && name.contains("--") {
                    return Err("cannot contain consecutive hyphens".into());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_kind_has_public_access_knob() {
        for kind in ResourceKind::iter() {
            assert!(
                kind.exposure_profile().public_access,
                "{kind} should expose a public access flag"
            );
        }
    }

    #[test]
    fn test_only_relational_database_needs_temporary_rule() {
        let with_rule: Vec<_> = ResourceKind::iter()
            .filter(|k| k.exposure_profile().temporary_rule)
            .collect();
        assert_eq!(with_rule, vec![ResourceKind::RelationalDatabase]);
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        assert_eq!(ResourceKind::AiServiceAccount.to_string(), "AIServiceAccount");
        assert_eq!(
            "AIServiceAccount".parse::<ResourceKind>().unwrap(),
            ResourceKind::AiServiceAccount
        );
        assert_eq!(
            "ObjectStore".parse::<ResourceKind>().unwrap(),
            ResourceKind::ObjectStore
        );
    }

    #[test]
    fn test_storage_names() {
        assert!(ResourceKind::ObjectStore.validate_name("kmstorage01").is_ok());
        assert!(ResourceKind::ObjectStore.validate_name("km").is_err());
        assert!(ResourceKind::ObjectStore.validate_name("km-storage").is_err());
        assert!(ResourceKind::ObjectStore.validate_name("KMStorage").is_err());
    }

    #[test]
    fn test_search_names() {
        assert!(ResourceKind::SearchService.validate_name("km-search").is_ok());
        assert!(ResourceKind::SearchService.validate_name("-km").is_err());
        assert!(ResourceKind::SearchService.validate_name("km--search").is_err());
    }

    #[test]
    fn test_sql_server_names() {
        assert!(ResourceKind::RelationalDatabase.validate_name("km-sql-01").is_ok());
        assert!(ResourceKind::RelationalDatabase.validate_name("km-sql-").is_err());
        assert!(ResourceKind::RelationalDatabase.validate_name("").is_err());
    }
}
