//! Configuration types for a provisioning run
//!
//! Values arrive raw from the CLI or environment; validation is the
//! resolver's job, so a bad value is reported with its parameter name.

use crate::grants::default_grant_plan;
use crate::orchestrator::RunOptions;
use crate::orchestrator::teardown::TeardownConfig;
use crate::pipeline::{CommandConfig, default_pipeline};
use crate::resolver::{Parameters, param};
use crate::wait::exponential_policy;
use std::path::PathBuf;
use std::time::Duration;

/// Subscription, resource group and the principal that receives grants
#[derive(Debug, Clone, Default)]
pub struct AzureConfig {
    pub subscription_id: Option<String>,
    pub resource_group: Option<String>,
    /// Tenant for credential resolution (overrides AZURE_TENANT_ID)
    pub tenant_id: Option<String>,
    pub principal_id: Option<String>,
    /// `User`, `ServicePrincipal` or `Group`
    pub principal_type: Option<String>,
}

/// Names and ids of the managed resources
#[derive(Debug, Clone, Default)]
pub struct ResourceParams {
    pub storage_account: Option<String>,
    pub storage_container: Option<String>,
    pub search_service: Option<String>,
    /// Query endpoint override for the search service
    pub search_endpoint: Option<String>,
    pub sql_server: Option<String>,
    pub sql_database: Option<String>,
    pub sql_identity_client_id: Option<String>,
    pub sql_identity_name: Option<String>,
    pub cosmos_account: Option<String>,
    /// Full ARM id of the AI services account
    pub ai_services_id: Option<String>,
    /// Full ARM id of the content-understanding account
    pub content_understanding_id: Option<String>,
}

/// Model deployments and sample-data selection
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    pub embedding_model: Option<String>,
    pub chat_model: Option<String>,
    pub use_case: Option<String>,
}

/// Where the stage scripts live and how they run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Interpreter used to launch the stage scripts
    pub python: String,
    pub scripts_dir: PathBuf,
    pub data_dir: PathBuf,
    /// Per-stage timeout in seconds
    pub stage_timeout: u64,
    /// Name of the temporary full-range firewall rule
    pub temp_rule_name: String,
}

/// Convergence polling
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub propagation_attempts: u32,
    pub min_poll_delay: Duration,
    pub max_poll_delay: Duration,
    /// Fail the run if an awaited grant does not propagate
    pub strict_propagation: bool,
}

/// Runtime behavior flags
#[derive(Debug, Clone, Default)]
pub struct RuntimeFlags {
    /// Plan only, no mutation
    pub dry_run: bool,
    /// JSON report path
    pub output: Option<PathBuf>,
    /// Mirror elevated state to this file during the run
    pub snapshot_file: Option<PathBuf>,
}

/// Configuration for a provisioning run
///
/// Composed of focused sub-configs, one per concern.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub azure: AzureConfig,
    pub resources: ResourceParams,
    pub models: ModelConfig,
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
    pub flags: RuntimeFlags,
}

/// Symbolic parameter map for the resolver
pub fn parameters(azure: &AzureConfig, resources: &ResourceParams, models: &ModelConfig) -> Parameters {
    let mut params = Parameters::new();
    params
        .set(param::SUBSCRIPTION_ID, azure.subscription_id.clone())
        .set(param::RESOURCE_GROUP, azure.resource_group.clone())
        .set(param::PRINCIPAL_ID, azure.principal_id.clone())
        .set(param::PRINCIPAL_TYPE, azure.principal_type.clone())
        .set(param::STORAGE_ACCOUNT, resources.storage_account.clone())
        .set(param::STORAGE_CONTAINER, resources.storage_container.clone())
        .set(param::SEARCH_SERVICE, resources.search_service.clone())
        .set(param::SEARCH_ENDPOINT, resources.search_endpoint.clone())
        .set(param::SQL_SERVER, resources.sql_server.clone())
        .set(param::SQL_DATABASE, resources.sql_database.clone())
        .set(param::SQL_IDENTITY_CLIENT_ID, resources.sql_identity_client_id.clone())
        .set(param::SQL_IDENTITY_NAME, resources.sql_identity_name.clone())
        .set(param::COSMOS_ACCOUNT, resources.cosmos_account.clone())
        .set(param::AI_SERVICES_ID, resources.ai_services_id.clone())
        .set(param::CONTENT_UNDERSTANDING_ID, resources.content_understanding_id.clone())
        .set(param::USE_CASE, models.use_case.clone())
        .set(param::EMBEDDING_MODEL, models.embedding_model.clone())
        .set(param::CHAT_MODEL, models.chat_model.clone());
    params
}

impl RunConfig {
    pub fn parameters(&self) -> Parameters {
        parameters(&self.azure, &self.resources, &self.models)
    }

    /// Orchestrator options with the default grant plan and pipeline
    pub fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::new(default_pipeline(&self.pipeline.python));
        options.temp_rule_name = self.pipeline.temp_rule_name.clone();
        options.grant_plan = default_grant_plan();
        options.scripts_dir = self.pipeline.scripts_dir.clone();
        options.data_dir = self.pipeline.data_dir.clone();
        options.propagation = exponential_policy(
            self.retry.propagation_attempts,
            self.retry.min_poll_delay,
            self.retry.max_poll_delay,
        );
        options.snapshot_file = self.flags.snapshot_file.clone();
        options.dry_run = self.flags.dry_run;
        if self.retry.strict_propagation {
            options = options.with_strict_propagation();
        }
        options
    }

    pub fn command_config(&self) -> CommandConfig {
        CommandConfig::with_timeout_secs(self.pipeline.stage_timeout)
    }
}

/// Arguments of the teardown command before they become a [`TeardownConfig`]
#[derive(Debug, Clone)]
pub struct TeardownParams {
    pub subscription_id: String,
    pub resource_group: String,
    pub purge_accounts: Vec<String>,
    pub execute: bool,
    pub deletion_attempts: u32,
    pub purge_attempts: u32,
    pub min_poll_delay: Duration,
    pub max_poll_delay: Duration,
}

impl From<TeardownParams> for TeardownConfig {
    fn from(p: TeardownParams) -> Self {
        Self {
            subscription_id: p.subscription_id,
            resource_group: p.resource_group,
            expected_accounts: p.purge_accounts,
            execute: p.execute,
            deletion: exponential_policy(p.deletion_attempts, p.min_poll_delay, p.max_poll_delay),
            purge: exponential_policy(p.purge_attempts, p.min_poll_delay, p.max_poll_delay),
        }
    }
}
