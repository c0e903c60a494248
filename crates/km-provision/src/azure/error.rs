//! Azure Resource Manager error classification
//!
//! ARM returns a JSON body `{"error": {"code", "message"}}` on failure. Errors
//! are classified by that code and the HTTP status, never by matching on
//! free-form message text.

use serde_json::Value;
use thiserror::Error;

/// Result alias for control-plane calls
pub type ArmResult<T> = std::result::Result<T, ArmError>;

/// ARM error categories for retry and cleanup logic
#[derive(Debug, Error)]
pub enum ArmError {
    /// Resource or resource group does not exist (safe to skip in cleanup)
    #[error("Resource not found: {message}")]
    NotFound { message: String },

    /// Resource already exists (safe to ignore in create operations)
    #[error("Resource already exists: {message}")]
    AlreadyExists { message: String },

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Another operation holds the resource (retryable)
    #[error("Conflicting operation in progress: {message}")]
    Conflict { message: String },

    /// Caller lacks permission for the operation
    #[error("Authorization failed: {message}")]
    Forbidden { message: String },

    /// Could not obtain a bearer token
    #[error("Failed to acquire Azure access token: {0}")]
    Auth(String),

    /// Request never produced an HTTP response
    #[error("HTTP request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Generic ARM error with code and message
    #[error("ARM error ({}): {message}", code.as_deref().unwrap_or("no code"))]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl ArmError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArmError::NotFound { .. })
    }

    /// Check if this is an "already exists" error
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ArmError::AlreadyExists { .. })
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArmError::Throttled | ArmError::Conflict { .. })
    }

    /// ARM error code, when the error carried one
    pub fn code(&self) -> Option<&str> {
        match self {
            ArmError::Sdk { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Get a user-friendly suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            ArmError::Forbidden { .. } => suggestion_for_code("AuthorizationFailed"),
            ArmError::Throttled => suggestion_for_code("TooManyRequests"),
            ArmError::Auth(_) => Some(
                "Run 'az login' or set AZURE_CLIENT_ID, AZURE_CLIENT_SECRET and AZURE_TENANT_ID."
                    .to_string(),
            ),
            ArmError::Sdk { code: Some(c), .. } => suggestion_for_code(c),
            _ => None,
        }
    }
}

/// Known ARM error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFound",
    "ResourceGroupNotFound",
    "ParentResourceNotFound",
    "NotFound",
    "DeletedAccountNotFound",
    "FirewallRuleNotFound",
    "RoleAssignmentNotFound",
];

/// Known ARM error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &["RoleAssignmentExists", "ResourceAlreadyExists"];

/// Known ARM error codes for throttling
const THROTTLING_CODES: &[&str] = &["TooManyRequests", "SubscriptionRequestsThrottled"];

/// Known ARM error codes for in-flight conflicting operations
const CONFLICT_CODES: &[&str] = &[
    "AnotherOperationInProgress",
    "OperationNotAllowed",
    "ConflictingServerOperation",
];

/// Known ARM error codes for authorization failures
const FORBIDDEN_CODES: &[&str] = &["AuthorizationFailed", "LinkedAuthorizationFailed"];

/// Classify an ARM failure using the HTTP status and the error code.
pub fn classify_arm_error(status: u16, code: Option<&str>, message: Option<&str>) -> ArmError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => ArmError::NotFound { message },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => ArmError::AlreadyExists { message },
        Some(c) if THROTTLING_CODES.contains(&c) => ArmError::Throttled,
        Some(c) if CONFLICT_CODES.contains(&c) => ArmError::Conflict { message },
        Some(c) if FORBIDDEN_CODES.contains(&c) => ArmError::Forbidden { message },
        _ => match status {
            404 => ArmError::NotFound { message },
            429 => ArmError::Throttled,
            403 => ArmError::Forbidden { message },
            _ => ArmError::Sdk {
                code: code.map(|s| s.to_string()),
                message,
            },
        },
    }
}

/// Classify an ARM error response body.
///
/// Accepts both `{"error": {...}}` and the bare `{"code", "message"}` form
/// that some resource providers return.
pub fn classify_arm_body(status: u16, body: &Value) -> ArmError {
    let err = body
        .get("error")
        .or_else(|| body.get("Error"))
        .unwrap_or(body);
    classify_arm_error(status, err["code"].as_str(), err["message"].as_str())
}

/// Ignore NotFound errors, useful in restore and teardown paths
pub fn ignore_not_found<T: Default>(result: ArmResult<T>) -> ArmResult<T> {
    match result {
        Err(e) if e.is_not_found() => Ok(T::default()),
        other => other,
    }
}

/// Error code to user-friendly suggestion mapping
const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "AuthorizationFailed",
        "The signed-in principal needs Owner or User Access Administrator on the resource group.",
    ),
    (
        "LinkedAuthorizationFailed",
        "The signed-in principal needs Owner or User Access Administrator on the resource group.",
    ),
    (
        "TooManyRequests",
        "ARM rate limit hit. The operation will be retried automatically.",
    ),
    (
        "SubscriptionRequestsThrottled",
        "ARM rate limit hit. The operation will be retried automatically.",
    ),
    (
        "FlagMustBeSetForRestore",
        "A soft-deleted account with this name exists. Purge it or restore it before re-deploying.",
    ),
    (
        "PrincipalNotFound",
        "The principal id is not visible to ARM yet. Retry after directory replication.",
    ),
];

/// Get a user-friendly suggestion for a known error code.
fn suggestion_for_code(code: &str) -> Option<String> {
    SUGGESTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| (*s).to_string())
}
