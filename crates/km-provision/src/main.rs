//! km-provision: elevate, grant, run the ingestion pipeline, restore
//!
//! Every invocation parameter can also come from the environment, so the
//! tool can be driven from a deployment hook without a long command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use km_provision::azure::{ArmClient, ArmContext};
use km_provision::config::{self, RunConfig, TeardownParams};
use km_provision::orchestrator::recover::restore_from_file;
use km_provision::orchestrator::signal::spawn_signal_listener;
use km_provision::orchestrator::status::{collect_status, print_status};
use km_provision::orchestrator::teardown::{TeardownConfig, teardown};
use km_provision::orchestrator::Orchestrator;
use km_provision::pipeline::ProcessExecutor;
use km_provision_common::defaults::{
    DEFAULT_CHAT_MODEL, DEFAULT_DATA_DIR, DEFAULT_DELETION_ATTEMPTS, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_MAX_POLL_DELAY, DEFAULT_MIN_POLL_DELAY, DEFAULT_PROPAGATION_ATTEMPTS,
    DEFAULT_PURGE_ATTEMPTS, DEFAULT_PYTHON, DEFAULT_SCRIPTS_DIR, DEFAULT_STAGE_TIMEOUT,
    DEFAULT_TEMP_RULE_NAME,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "km-provision")]
#[command(about = "Provisioning orchestrator for the knowledge-mining accelerator")]
#[command(version)]
struct Args {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Which resources to act on; shared by `run` and `status`
#[derive(clap::Args, Debug)]
struct TargetArgs {
    #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
    subscription_id: Option<String>,

    #[arg(long, env = "AZURE_RESOURCE_GROUP")]
    resource_group: Option<String>,

    /// Tenant used for credential resolution
    #[arg(long, env = "AZURE_TENANT_ID")]
    tenant_id: Option<String>,

    /// Object id of the identity that receives the role grants
    #[arg(long, env = "KM_PRINCIPAL_ID")]
    principal_id: Option<String>,

    /// User, ServicePrincipal or Group
    #[arg(long, env = "KM_PRINCIPAL_TYPE")]
    principal_type: Option<String>,

    #[arg(long, env = "KM_STORAGE_ACCOUNT")]
    storage_account: Option<String>,

    #[arg(long, env = "KM_STORAGE_CONTAINER", default_value = "data")]
    storage_container: String,

    #[arg(long, env = "KM_SEARCH_SERVICE")]
    search_service: Option<String>,

    /// Query endpoint, when it differs from https://<service>.search.windows.net
    #[arg(long, env = "KM_SEARCH_ENDPOINT")]
    search_endpoint: Option<String>,

    #[arg(long, env = "KM_SQL_SERVER")]
    sql_server: Option<String>,

    #[arg(long, env = "KM_SQL_DATABASE")]
    sql_database: Option<String>,

    /// Client id of the managed identity the application uses against SQL
    #[arg(long, env = "KM_SQL_IDENTITY_CLIENT_ID")]
    sql_identity_client_id: Option<String>,

    #[arg(long, env = "KM_SQL_IDENTITY_NAME")]
    sql_identity_name: Option<String>,

    /// Optional document database account
    #[arg(long, env = "KM_COSMOS_ACCOUNT")]
    cosmos_account: Option<String>,

    /// Full ARM id of the AI services account
    #[arg(long, env = "KM_AI_SERVICES_ID")]
    ai_services_id: Option<String>,

    /// Full ARM id of the content-understanding account (optional)
    #[arg(long, env = "KM_CONTENT_UNDERSTANDING_ID")]
    content_understanding_id: Option<String>,

    #[arg(long, env = "KM_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    #[arg(long, env = "KM_CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    chat_model: String,

    /// Sample data set: telecom or IT_helpdesk
    #[arg(long, env = "KM_USE_CASE", default_value = "telecom")]
    use_case: String,
}

impl TargetArgs {
    fn split(self) -> (config::AzureConfig, config::ResourceParams, config::ModelConfig) {
        (
            config::AzureConfig {
                subscription_id: self.subscription_id,
                resource_group: self.resource_group,
                tenant_id: self.tenant_id,
                principal_id: self.principal_id,
                principal_type: self.principal_type,
            },
            config::ResourceParams {
                storage_account: self.storage_account,
                storage_container: Some(self.storage_container),
                search_service: self.search_service,
                search_endpoint: self.search_endpoint,
                sql_server: self.sql_server,
                sql_database: self.sql_database,
                sql_identity_client_id: self.sql_identity_client_id,
                sql_identity_name: self.sql_identity_name,
                cosmos_account: self.cosmos_account,
                ai_services_id: self.ai_services_id,
                content_understanding_id: self.content_understanding_id,
            },
            config::ModelConfig {
                embedding_model: Some(self.embedding_model),
                chat_model: Some(self.chat_model),
                use_case: Some(self.use_case),
            },
        )
    }
}

/// Arguments for the run command (extracted to reduce enum size)
#[derive(clap::Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Interpreter for the stage scripts
    #[arg(long, env = "KM_PYTHON", default_value = DEFAULT_PYTHON)]
    python: String,

    #[arg(long, env = "KM_SCRIPTS_DIR", default_value = DEFAULT_SCRIPTS_DIR)]
    scripts_dir: PathBuf,

    #[arg(long, env = "KM_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Per-stage timeout in seconds
    #[arg(long, default_value_t = DEFAULT_STAGE_TIMEOUT)]
    stage_timeout: u64,

    /// Name of the temporary full-range firewall rule
    #[arg(long, default_value = DEFAULT_TEMP_RULE_NAME)]
    temp_rule_name: String,

    /// Polls while waiting for a new role grant to propagate
    #[arg(long, default_value_t = DEFAULT_PROPAGATION_ATTEMPTS)]
    propagation_attempts: u32,

    /// Fail the run if a role grant does not propagate in time
    #[arg(long)]
    strict_propagation: bool,

    /// Print the plan and exit without changing anything
    #[arg(long)]
    dry_run: bool,

    /// Write the run report as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep elevated state in this file for `km-provision restore`
    #[arg(long, env = "KM_SNAPSHOT_FILE")]
    snapshot_file: Option<PathBuf>,
}

impl From<RunArgs> for RunConfig {
    fn from(args: RunArgs) -> Self {
        let (azure, resources, models) = args.target.split();
        Self {
            azure,
            resources,
            models,
            pipeline: config::PipelineConfig {
                python: args.python,
                scripts_dir: args.scripts_dir,
                data_dir: args.data_dir,
                stage_timeout: args.stage_timeout,
                temp_rule_name: args.temp_rule_name,
            },
            retry: config::RetryConfig {
                propagation_attempts: args.propagation_attempts,
                min_poll_delay: DEFAULT_MIN_POLL_DELAY,
                max_poll_delay: DEFAULT_MAX_POLL_DELAY,
                strict_propagation: args.strict_propagation,
            },
            flags: config::RuntimeFlags {
                dry_run: args.dry_run,
                output: args.output,
                snapshot_file: args.snapshot_file,
            },
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Elevate access, ensure grants, run the pipeline, restore access
    Run(Box<RunArgs>),

    /// Show the current network exposure of every resource (read-only)
    Status(Box<TargetArgs>),

    /// Restore resources recorded in a snapshot file by an interrupted run
    Restore {
        /// Snapshot file written by `run --snapshot-file`
        #[arg(long, env = "KM_SNAPSHOT_FILE")]
        snapshot_file: PathBuf,

        #[arg(long, env = "AZURE_TENANT_ID")]
        tenant_id: Option<String>,
    },

    /// Delete the resource group and purge its soft-deleted AI accounts
    Teardown {
        #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
        subscription_id: String,

        #[arg(long, env = "AZURE_RESOURCE_GROUP")]
        resource_group: String,

        #[arg(long, env = "AZURE_TENANT_ID")]
        tenant_id: Option<String>,

        /// AI account names to wait for and purge (comma-separated)
        #[arg(long, value_delimiter = ',')]
        purge_accounts: Vec<String>,

        #[arg(long, default_value_t = DEFAULT_DELETION_ATTEMPTS)]
        deletion_attempts: u32,

        #[arg(long, default_value_t = DEFAULT_PURGE_ATTEMPTS)]
        purge_attempts: u32,

        /// Actually delete (default is dry-run)
        #[arg(long)]
        execute: bool,
    },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

fn init_tracing(format: LogFormat) {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    // HTTP internals are only interesting when they fail
    for noisy in ["reqwest=warn", "hyper=warn", "hyper_util=warn"] {
        if let Ok(directive) = noisy.parse() {
            filter = filter.add_directive(directive);
        }
    }

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn arm_client(tenant_id: Option<&str>) -> Result<ArmClient> {
    let ctx = ArmContext::from_env(tenant_id).context("Failed to resolve Azure credentials")?;
    info!(source = ctx.credential_source(), "Using Azure credentials");
    Ok(ArmClient::from_context(&ctx))
}

/// Returns the process exit code
async fn run() -> Result<i32> {
    let args = Args::parse();
    init_tracing(args.log_format);

    match args.command {
        Command::Run(run_args) => handle_run((*run_args).into()).await,
        Command::Status(target) => {
            let (azure, resources, models) = (*target).split();
            let arm = arm_client(azure.tenant_id.as_deref())?;
            let lines = collect_status(&arm, &config::parameters(&azure, &resources, &models)).await?;
            print_status(&lines);
            Ok(0)
        }
        Command::Restore {
            snapshot_file,
            tenant_id,
        } => {
            let arm = arm_client(tenant_id.as_deref())?;
            let report = restore_from_file(&arm, &snapshot_file).await?;
            if report.is_clean() {
                println!("Restored {} resource(s)", report.restored.len());
                Ok(0)
            } else {
                for failure in &report.failed {
                    println!("not restored: {} ({})", failure.resource, failure.errors.join("; "));
                }
                Ok(1)
            }
        }
        Command::Teardown {
            subscription_id,
            resource_group,
            tenant_id,
            purge_accounts,
            deletion_attempts,
            purge_attempts,
            execute,
        } => {
            let arm = arm_client(tenant_id.as_deref())?;
            let config: TeardownConfig = TeardownParams {
                subscription_id,
                resource_group,
                purge_accounts,
                execute,
                deletion_attempts,
                purge_attempts,
                min_poll_delay: DEFAULT_MIN_POLL_DELAY,
                max_poll_delay: DEFAULT_MAX_POLL_DELAY,
            }
            .into();
            handle_teardown(&arm, &config).await
        }
    }
}

async fn handle_run(config: RunConfig) -> Result<i32> {
    let arm = arm_client(config.azure.tenant_id.as_deref())?;
    let cancel = CancellationToken::new();
    let listener = spawn_signal_listener(cancel.clone());

    let orchestrator = Orchestrator::new(
        &arm,
        ProcessExecutor::new(config.command_config()),
        config.run_options(),
    )
    .with_cancellation(cancel.clone());
    let result = orchestrator.run(&config.parameters()).await;

    cancel.cancel();
    let _ = listener.await;

    let report = result?;
    report.print_summary();
    if let Some(path) = &config.flags.output {
        report.write_json(path)?;
    }
    if report.cleanup_failed {
        warn!("Cleanup failed; see the report for resources still elevated");
    }
    Ok(report.exit_code)
}

async fn handle_teardown(arm: &ArmClient, config: &TeardownConfig) -> Result<i32> {
    let mode = if config.execute { "EXECUTE" } else { "DRY-RUN" };
    info!(resource_group = %config.resource_group, mode, "Tearing down");

    let cancel = CancellationToken::new();
    let listener = spawn_signal_listener(cancel.clone());
    let result = teardown(arm, config, &cancel).await;
    cancel.cancel();
    let _ = listener.await;
    let report = result?;

    println!("\n=== Teardown Report ===");
    println!("Mode: {mode}");
    println!("Resource group: {}", config.resource_group);
    println!("Existed: {}", report.group_existed);
    if config.execute {
        println!("Deleted: {}", report.group_deleted);
        println!("Purged:  {}", report.purged.join(", "));
        for name in &report.not_listed {
            println!("Not listed as soft-deleted: {name}");
        }
        for failure in &report.purge_failures {
            println!("Purge failed: {failure}");
        }
    } else {
        println!();
        println!("Run with --execute to actually delete resources.");
    }

    Ok(if report.is_clean() { 0 } else { 1 })
}
