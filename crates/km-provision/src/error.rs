//! Orchestrator error taxonomy
//!
//! Typed errors for every failure class a run can hit. Which of them stop the
//! forward phase is decided by the caller; none of them skip restoration.

use crate::azure::ArmError;
use crate::resolver::ResourceSlot;
use km_provision_common::{BuiltinRole, ResourceRef};
use thiserror::Error;

/// Bad or missing input, detected before any side effect
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Required parameter absent or blank
    #[error("missing required parameter '{0}'")]
    Missing(&'static str),

    /// Parameter present but unusable
    #[error("parameter '{name}' is malformed: {reason}")]
    Malformed { name: &'static str, reason: String },
}

/// Failures raised while running the orchestrator
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A required resource could not be found or read
    #[error("required resource for slot '{slot}' ({resource}) is unavailable: {reason}")]
    ResourceNotFound {
        slot: ResourceSlot,
        resource: String,
        reason: String,
    },

    /// An elevation or restoration call failed
    #[error("failed to change network exposure of {resource}")]
    NetworkMutation {
        resource: ResourceRef,
        #[source]
        source: ArmError,
    },

    /// A role grant could not be checked or created
    #[error("failed to ensure '{role}' for principal {principal_id} on {scope}")]
    RoleAssignment {
        role: BuiltinRole,
        principal_id: String,
        scope: ResourceRef,
        #[source]
        source: ArmError,
    },

    /// An external stage did not succeed
    #[error("pipeline stage '{stage}' failed: {reason}")]
    PipelineStage { stage: String, reason: String },

    /// The waiter ran out of attempts
    #[error("{what} did not converge after {attempts} attempts")]
    PropagationTimeout { what: String, attempts: u32 },

    /// SIGINT or SIGTERM arrived during the forward phase
    #[error("run interrupted by signal")]
    Interrupted,
}

impl OrchestratorError {
    /// Short label for the failure class, used in the end-of-run report
    pub fn class(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "validation",
            OrchestratorError::ResourceNotFound { .. } => "resource not found",
            OrchestratorError::NetworkMutation { .. } => "network mutation",
            OrchestratorError::RoleAssignment { .. } => "role assignment",
            OrchestratorError::PipelineStage { .. } => "pipeline stage",
            OrchestratorError::PropagationTimeout { .. } => "propagation timeout",
            OrchestratorError::Interrupted => "interrupted",
        }
    }
}
