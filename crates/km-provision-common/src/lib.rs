//! km-provision-common - Shared data model
//!
//! This crate provides the types shared by the orchestrator library, its
//! binary and the test helpers, without any HTTP or process dependencies.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`network_state`]: Exposure snapshots and firewall rules
//! - [`resource_kind`]: Managed resource kinds and their exposure knobs
//! - [`resource_ref`]: Canonical references to Azure resources
//! - [`retry`]: Bounded retry policy used by the convergence waiter
//! - [`role`]: Built-in roles and role grants
//! - [`status`]: Per-stage and per-resource outcome codes
//! - [`use_case`]: Sample-data use case selector

pub mod defaults;
pub mod network_state;
pub mod resource_kind;
pub mod resource_ref;
pub mod retry;
pub mod role;
pub mod status;
pub mod use_case;

// Re-export commonly used types
pub use network_state::{DefaultAction, ExposureConfig, FirewallRule, NetworkState};
pub use resource_kind::{ExposureProfile, ResourceKind};
pub use resource_ref::{ResourceIdError, ResourceRef};
pub use retry::RetryPolicy;
pub use role::{BuiltinRole, PrincipalType, RoleGrant};
pub use status::{ResourceOutcome, StageStatus};
pub use use_case::UseCase;
