//! Default configuration values shared by the library and the CLI
//!
//! These constants keep the CLI defaults and the library defaults in step.

use std::time::Duration;

/// Name of the wide-open firewall rule created on relational database servers
pub const DEFAULT_TEMP_RULE_NAME: &str = "km-provision-temp-allow-all";

/// Default interpreter for pipeline stage scripts
pub const DEFAULT_PYTHON: &str = "python3";

/// Default directory holding the pipeline stage scripts
pub const DEFAULT_SCRIPTS_DIR: &str = "infra/scripts";

/// Default directory holding the per-use-case sample data
pub const DEFAULT_DATA_DIR: &str = "infra/data";

/// Default per-stage timeout in seconds (2 hours)
pub const DEFAULT_STAGE_TIMEOUT: u64 = 7200;

/// Default embedding model deployment name
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Default chat model deployment name
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Default number of polls while waiting for a role assignment to propagate
pub const DEFAULT_PROPAGATION_ATTEMPTS: u32 = 6;

/// Default number of polls while waiting for a resource group deletion
pub const DEFAULT_DELETION_ATTEMPTS: u32 = 40;

/// Default number of polls while waiting for a soft-deleted account to be purgeable
pub const DEFAULT_PURGE_ATTEMPTS: u32 = 20;

/// Shortest delay between convergence polls
pub const DEFAULT_MIN_POLL_DELAY: Duration = Duration::from_secs(10);

/// Longest delay between convergence polls
pub const DEFAULT_MAX_POLL_DELAY: Duration = Duration::from_secs(120);
