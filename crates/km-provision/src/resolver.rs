//! Resource identity resolution
//!
//! Turns the symbolic invocation parameters into canonical [`ResourceRef`]s.
//! Parsing is pure and all-or-nothing: the first missing or malformed
//! parameter aborts resolution before anything touches the control plane.
//! Existence checks afterwards are read-only.

use crate::control_plane::CloudControlPlane;
use crate::error::{OrchestratorError, ValidationError};
use km_provision_common::{PrincipalType, ResourceKind, ResourceRef, UseCase};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Symbolic parameter names accepted by the resolver
pub mod param {
    pub const SUBSCRIPTION_ID: &str = "subscription_id";
    pub const RESOURCE_GROUP: &str = "resource_group";
    pub const PRINCIPAL_ID: &str = "principal_id";
    pub const PRINCIPAL_TYPE: &str = "principal_type";
    pub const STORAGE_ACCOUNT: &str = "storage_account";
    pub const STORAGE_CONTAINER: &str = "storage_container";
    pub const SEARCH_SERVICE: &str = "search_service";
    pub const SEARCH_ENDPOINT: &str = "search_endpoint";
    pub const SQL_SERVER: &str = "sql_server";
    pub const SQL_DATABASE: &str = "sql_database";
    pub const SQL_IDENTITY_CLIENT_ID: &str = "sql_identity_client_id";
    pub const SQL_IDENTITY_NAME: &str = "sql_identity_name";
    pub const COSMOS_ACCOUNT: &str = "cosmos_account";
    pub const AI_SERVICES_ID: &str = "ai_services_id";
    pub const CONTENT_UNDERSTANDING_ID: &str = "content_understanding_id";
    pub const USE_CASE: &str = "use_case";
    pub const EMBEDDING_MODEL: &str = "embedding_model";
    pub const CHAT_MODEL: &str = "chat_model";
}

/// A managed resource the orchestrator knows how to find
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
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResourceSlot {
    Storage,
    Search,
    Sql,
    Cosmos,
    AiServices,
    ContentUnderstanding,
}

impl ResourceSlot {
    pub fn kind(self) -> ResourceKind {
        match self {
            ResourceSlot::Storage => ResourceKind::ObjectStore,
            ResourceSlot::Search => ResourceKind::SearchService,
            ResourceSlot::Sql => ResourceKind::RelationalDatabase,
            ResourceSlot::Cosmos => ResourceKind::DocumentDatabase,
            ResourceSlot::AiServices | ResourceSlot::ContentUnderstanding => {
                ResourceKind::AiServiceAccount
            }
        }
    }

    /// Whether a run can proceed without this resource
    pub fn required(self) -> bool {
        !matches!(self, ResourceSlot::Cosmos | ResourceSlot::ContentUnderstanding)
    }

    /// Parameter that identifies the resource
    pub fn parameter(self) -> &'static str {
        match self {
            ResourceSlot::Storage => param::STORAGE_ACCOUNT,
            ResourceSlot::Search => param::SEARCH_SERVICE,
            ResourceSlot::Sql => param::SQL_SERVER,
            ResourceSlot::Cosmos => param::COSMOS_ACCOUNT,
            ResourceSlot::AiServices => param::AI_SERVICES_ID,
            ResourceSlot::ContentUnderstanding => param::CONTENT_UNDERSTANDING_ID,
        }
    }

    /// Whether the parameter carries a full ARM id rather than a bare name
    fn takes_arm_id(self) -> bool {
        matches!(
            self,
            ResourceSlot::AiServices | ResourceSlot::ContentUnderstanding
        )
    }
}

/// Raw invocation parameters keyed by symbolic name
///
/// Blank values are treated the same as absent ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters(BTreeMap<String, String>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, ignoring `None`
    pub fn set(&mut self, name: &str, value: Option<impl Into<String>>) -> &mut Self {
        if let Some(value) = value {
            self.0.insert(name.to_string(), value.into());
        }
        self
    }

    /// Builder form of [`set`](Self::set)
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    /// Remove a parameter
    pub fn without(mut self, name: &str) -> Self {
        self.0.remove(name);
        self
    }

    /// Trimmed value, `None` when absent or blank
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, name: &'static str) -> Result<&str, ValidationError> {
        self.get(name).ok_or(ValidationError::Missing(name))
    }
}

/// Non-resource settings carried alongside the resolved references
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSettings {
    pub subscription_id: String,
    pub resource_group: String,
    pub principal_id: String,
    pub principal_type: PrincipalType,
    pub storage_container: String,
    /// Query endpoint override for the search service
    pub search_endpoint: Option<String>,
    pub sql_database: String,
    pub sql_identity_client_id: String,
    pub sql_identity_name: String,
    pub use_case: UseCase,
    pub embedding_model: String,
    pub chat_model: String,
}

/// How a slot ended up after resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotResolution {
    Resolved(ResourceRef),
    /// Optional slot without a parameter
    NotConfigured,
    /// Optional slot that is configured but could not be found
    NotFound { resource: ResourceRef, reason: String },
}

/// Output of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedResources {
    pub slots: BTreeMap<ResourceSlot, SlotResolution>,
    pub settings: ResolvedSettings,
}

impl ResolvedResources {
    /// Reference for a slot, only when it resolved
    pub fn get(&self, slot: ResourceSlot) -> Option<&ResourceRef> {
        match self.slots.get(&slot) {
            Some(SlotResolution::Resolved(resource)) => Some(resource),
            _ => None,
        }
    }

    pub fn resolution(&self, slot: ResourceSlot) -> &SlotResolution {
        static NOT_CONFIGURED: SlotResolution = SlotResolution::NotConfigured;
        self.slots.get(&slot).unwrap_or(&NOT_CONFIGURED)
    }

    /// Resolved slots in slot order
    pub fn resolved(&self) -> impl Iterator<Item = (ResourceSlot, &ResourceRef)> {
        self.slots.iter().filter_map(|(slot, r)| match r {
            SlotResolution::Resolved(resource) => Some((*slot, resource)),
            _ => None,
        })
    }

    /// Data-plane endpoint of a resolved slot
    pub fn endpoint(&self, slot: ResourceSlot) -> Option<String> {
        let resource = self.get(slot)?;
        if slot == ResourceSlot::Search {
            if let Some(endpoint) = &self.settings.search_endpoint {
                return Some(endpoint.clone());
            }
        }
        Some(endpoint_for(resource))
    }
}

/// Default data-plane endpoint for a resource
pub fn endpoint_for(resource: &ResourceRef) -> String {
    let name = resource.name();
    match resource.kind() {
        ResourceKind::ObjectStore => format!("https://{name}.blob.core.windows.net"),
        ResourceKind::SearchService => format!("https://{name}.search.windows.net"),
        ResourceKind::DocumentDatabase => format!("https://{name}.documents.azure.com:443/"),
        ResourceKind::RelationalDatabase => format!("{name}.database.windows.net"),
        ResourceKind::AiServiceAccount => format!("https://{name}.cognitiveservices.azure.com/"),
    }
}

fn validate_guid(name: &'static str, value: &str) -> Result<String, ValidationError> {
    uuid::Uuid::parse_str(value)
        .map(|_| value.to_ascii_lowercase())
        .map_err(|_| ValidationError::Malformed {
            name,
            reason: format!("'{value}' is not a GUID"),
        })
}

fn validate_resource_group(value: &str) -> Result<(), ValidationError> {
    let malformed = |reason: &str| ValidationError::Malformed {
        name: param::RESOURCE_GROUP,
        reason: reason.to_string(),
    };
    if value.chars().count() > 90 {
        return Err(malformed("must be at most 90 characters"));
    }
    if value.ends_with('.') {
        return Err(malformed("must not end with a period"));
    }
    if !value
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')'))
    {
        return Err(malformed(
            "only letters, digits, '-', '_', '.', '(' and ')' are allowed",
        ));
    }
    Ok(())
}

fn validate_container(value: &str) -> Result<(), ValidationError> {
    let len = value.len();
    let valid = (3..=63).contains(&len)
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
        && !value.contains("--");
    if valid {
        Ok(())
    } else {
        Err(ValidationError::Malformed {
            name: param::STORAGE_CONTAINER,
            reason: format!(
                "'{value}' must be 3-63 lowercase letters, digits or single hyphens"
            ),
        })
    }
}

fn parse_slot(
    params: &Parameters,
    slot: ResourceSlot,
    subscription_id: &str,
    resource_group: &str,
) -> Result<Option<ResourceRef>, ValidationError> {
    let name = slot.parameter();
    let Some(value) = params.get(name) else {
        return if slot.required() {
            Err(ValidationError::Missing(name))
        } else {
            Ok(None)
        };
    };

    if slot.takes_arm_id() {
        return ResourceRef::parse_id(slot.kind(), value)
            .map(Some)
            .map_err(|e| ValidationError::Malformed {
                name,
                reason: e.to_string(),
            });
    }

    slot.kind()
        .validate_name(value)
        .map_err(|reason| ValidationError::Malformed { name, reason })?;
    Ok(Some(ResourceRef::new(
        slot.kind(),
        value,
        resource_group,
        subscription_id,
    )))
}

/// Validate every parameter and build the references, without I/O
///
/// Returns the first problem found; nothing is partially resolved.
pub fn parse_parameters(
    params: &Parameters,
) -> Result<(BTreeMap<ResourceSlot, Option<ResourceRef>>, ResolvedSettings), ValidationError> {
    use strum::IntoEnumIterator;

    let subscription_id =
        validate_guid(param::SUBSCRIPTION_ID, params.require(param::SUBSCRIPTION_ID)?)?;
    let resource_group = params.require(param::RESOURCE_GROUP)?.to_string();
    validate_resource_group(&resource_group)?;
    let principal_id = validate_guid(param::PRINCIPAL_ID, params.require(param::PRINCIPAL_ID)?)?;
    let principal_type = match params.get(param::PRINCIPAL_TYPE) {
        None => PrincipalType::default(),
        Some(value) => value
            .parse::<PrincipalType>()
            .map_err(|_| ValidationError::Malformed {
                name: param::PRINCIPAL_TYPE,
                reason: format!("'{value}' is not one of User, ServicePrincipal"),
            })?,
    };

    let mut slots = BTreeMap::new();
    for slot in ResourceSlot::iter() {
        slots.insert(
            slot,
            parse_slot(params, slot, &subscription_id, &resource_group)?,
        );
    }

    let storage_container = params.require(param::STORAGE_CONTAINER)?.to_string();
    validate_container(&storage_container)?;

    let search_endpoint = match params.get(param::SEARCH_ENDPOINT) {
        Some(endpoint) if !endpoint.starts_with("https://") => {
            return Err(ValidationError::Malformed {
                name: param::SEARCH_ENDPOINT,
                reason: format!("'{endpoint}' must be an https:// URL"),
            });
        }
        other => other.map(|e| e.trim_end_matches('/').to_string()),
    };

    let sql_database = params.require(param::SQL_DATABASE)?.to_string();
    let sql_identity_client_id = validate_guid(
        param::SQL_IDENTITY_CLIENT_ID,
        params.require(param::SQL_IDENTITY_CLIENT_ID)?,
    )?;
    let sql_identity_name = params.require(param::SQL_IDENTITY_NAME)?.to_string();

    let use_case_raw = params.require(param::USE_CASE)?;
    let use_case = use_case_raw
        .parse::<UseCase>()
        .map_err(|_| ValidationError::Malformed {
            name: param::USE_CASE,
            reason: format!("'{use_case_raw}' is not one of telecom, IT_helpdesk"),
        })?;

    let settings = ResolvedSettings {
        subscription_id,
        resource_group,
        principal_id,
        principal_type,
        storage_container,
        search_endpoint,
        sql_database,
        sql_identity_client_id,
        sql_identity_name,
        use_case,
        embedding_model: params.require(param::EMBEDDING_MODEL)?.to_string(),
        chat_model: params.require(param::CHAT_MODEL)?.to_string(),
    };

    Ok((slots, settings))
}

/// Parse the parameters and confirm every configured resource exists
///
/// Required slots that are missing abort with `ResourceNotFound`; optional
/// ones degrade to [`SlotResolution::NotFound`] with a warning.
pub async fn resolve<C: CloudControlPlane>(
    cp: &C,
    params: &Parameters,
) -> Result<ResolvedResources, OrchestratorError> {
    let (parsed, settings) = parse_parameters(params)?;

    let mut slots = BTreeMap::new();
    for (slot, resource) in parsed {
        let Some(resource) = resource else {
            debug!(slot = %slot, "Optional resource not configured");
            slots.insert(slot, SlotResolution::NotConfigured);
            continue;
        };

        let missing_reason = match cp.resource_exists(&resource).await {
            Ok(true) => None,
            Ok(false) => Some("resource does not exist".to_string()),
            Err(e) => Some(e.to_string()),
        };

        match missing_reason {
            None => {
                debug!(slot = %slot, resource = %resource, "Resolved resource");
                slots.insert(slot, SlotResolution::Resolved(resource));
            }
            Some(reason) if slot.required() => {
                return Err(OrchestratorError::ResourceNotFound {
                    slot,
                    resource: resource.id(),
                    reason,
                });
            }
            Some(reason) => {
                warn!(slot = %slot, resource = %resource, reason = %reason, "Optional resource unavailable, skipping");
                slots.insert(slot, SlotResolution::NotFound { resource, reason });
            }
        }
    }

    info!(
        resolved = slots
            .values()
            .filter(|r| matches!(r, SlotResolution::Resolved(_)))
            .count(),
        resource_group = %settings.resource_group,
        "Resolved resources"
    );

    Ok(ResolvedResources { slots, settings })
}
