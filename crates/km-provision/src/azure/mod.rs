//! Azure Resource Manager client
//!
//! This module provides a thin typed wrapper over the ARM REST API for:
//! - Exposure: public network access and default network action per resource kind
//! - Firewall: inbound IPv4 rules on relational database servers
//! - Authorization: role assignment listing and creation
//! - Resource groups: existence, deletion, soft-deleted account purge

mod authorization;
mod client;
pub mod context;
pub mod error;
mod firewall;
mod network;
mod resource_group;

pub use authorization::RoleAssignment;
pub use context::ArmContext;
pub use error::{ArmError, ArmResult, classify_arm_body, classify_arm_error, ignore_not_found};
pub use network::api_version;
pub use resource_group::DeletedAccount;

use backon::ExponentialBuilder;
use std::time::Duration;

/// Delays between polls of a long-running ARM operation, cycled
const OPERATION_POLL_DELAYS: [Duration; 6] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(16),
    Duration::from_secs(30),
];

/// Polls before a long-running operation is abandoned
const OPERATION_MAX_POLLS: usize = 120;

/// ARM client used as the live control plane
#[derive(Debug, Clone)]
pub struct ArmClient {
    pub(crate) ctx: ArmContext,
    throttle_backoff: ExponentialBuilder,
    operation_delays: Vec<Duration>,
    operation_max_polls: usize,
}

impl ArmClient {
    /// Create an ARM client from a resolved credential context
    pub fn from_context(ctx: &ArmContext) -> Self {
        Self {
            ctx: ctx.clone(),
            throttle_backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(2))
                .with_max_delay(Duration::from_secs(60))
                .with_max_times(6)
                .with_jitter(),
            operation_delays: OPERATION_POLL_DELAYS.to_vec(),
            operation_max_polls: OPERATION_MAX_POLLS,
        }
    }

    /// Override the backoff used when ARM throttles or reports a conflict
    pub fn with_throttle_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.throttle_backoff = backoff;
        self
    }

    /// Override how long-running operations are polled
    pub fn with_operation_polling(mut self, delays: Vec<Duration>, max_polls: usize) -> Self {
        self.operation_delays = delays;
        self.operation_max_polls = max_polls;
        self
    }

    /// Credential context backing this client
    pub fn context(&self) -> &ArmContext {
        &self.ctx
    }
}
