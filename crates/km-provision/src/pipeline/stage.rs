//! Pipeline stage definitions
//!
//! Stages are plain data. Their arguments are typed references into the
//! [`StageContext`], rendered to strings only at launch time.

use crate::resolver::{ResolvedResources, ResourceSlot};
use serde::Serialize;
use std::path::PathBuf;

/// One argument of a stage's command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StageArg {
    /// A literal `--flag`
    Flag(&'static str),
    /// A literal value
    Literal(String),
    /// Script path, relative to the scripts directory
    Script(&'static str),
    /// Resource name of a slot
    Name(ResourceSlot),
    /// Data-plane endpoint of a slot
    Endpoint(ResourceSlot),
    /// Full ARM id of a slot
    ResourceId(ResourceSlot),
    Container,
    Database,
    SqlIdentityClientId,
    SqlIdentityName,
    EmbeddingModel,
    ChatModel,
    UseCase,
    /// Sample-data directory for the selected use case
    SampleDataDir,
    ResourceGroup,
    SubscriptionId,
}

/// Values stage arguments are rendered from
#[derive(Debug, Clone)]
pub struct StageContext<'a> {
    pub resources: &'a ResolvedResources,
    pub scripts_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl StageContext<'_> {
    /// Render one argument; `Err` names the unavailable slot
    pub fn render(&self, arg: &StageArg) -> Result<String, ResourceSlot> {
        let settings = &self.resources.settings;
        let resource = |slot: ResourceSlot| self.resources.get(slot).ok_or(slot);

        Ok(match arg {
            StageArg::Flag(flag) => flag.to_string(),
            StageArg::Literal(value) => value.clone(),
            StageArg::Script(name) => self.scripts_dir.join(name).display().to_string(),
            StageArg::Name(slot) => resource(*slot)?.name().to_string(),
            StageArg::Endpoint(slot) => self.resources.endpoint(*slot).ok_or(*slot)?,
            StageArg::ResourceId(slot) => resource(*slot)?.id(),
            StageArg::Container => settings.storage_container.clone(),
            StageArg::Database => settings.sql_database.clone(),
            StageArg::SqlIdentityClientId => settings.sql_identity_client_id.clone(),
            StageArg::SqlIdentityName => settings.sql_identity_name.clone(),
            StageArg::EmbeddingModel => settings.embedding_model.clone(),
            StageArg::ChatModel => settings.chat_model.clone(),
            StageArg::UseCase => settings.use_case.to_string(),
            StageArg::SampleDataDir => self
                .data_dir
                .join(settings.use_case.sample_data_dir())
                .display()
                .to_string(),
            StageArg::ResourceGroup => settings.resource_group.clone(),
            StageArg::SubscriptionId => settings.subscription_id.clone(),
        })
    }
}

/// One external program in the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStage {
    pub name: String,
    /// Executable to launch
    pub program: String,
    pub args: Vec<StageArg>,
    /// A failure stops the stages after this one
    pub hard_failure: bool,
    /// Slots that must be resolved for the stage to run
    pub requires: Vec<ResourceSlot>,
}

impl PipelineStage {
    /// First required slot that is not resolved
    pub fn missing_slot(&self, resources: &ResolvedResources) -> Option<ResourceSlot> {
        self.requires
            .iter()
            .copied()
            .find(|slot| resources.get(*slot).is_none())
    }

    /// Render the full argument list
    pub fn render_args(&self, ctx: &StageContext<'_>) -> Result<Vec<String>, ResourceSlot> {
        self.args.iter().map(|arg| ctx.render(arg)).collect()
    }
}

fn python_stage(
    python: &str,
    name: &str,
    script: &'static str,
    args: Vec<StageArg>,
    requires: Vec<ResourceSlot>,
) -> PipelineStage {
    let mut full_args = vec![StageArg::Script(script)];
    full_args.extend(args);
    PipelineStage {
        name: name.to_string(),
        program: python.to_string(),
        args: full_args,
        hard_failure: true,
        requires,
    }
}

/// The stock ingestion pipeline
///
/// Index creation, one content-understanding template per modality, the SQL
/// user for the application identity, then sample-data ingestion.
pub fn default_pipeline(python: &str) -> Vec<PipelineStage> {
    use ResourceSlot::*;
    use StageArg::*;

    let template = |modality: &'static str| {
        python_stage(
            python,
            &format!("create-cu-template-{modality}"),
            "02_create_cu_template.py",
            vec![
                Flag("--cu-endpoint"),
                Endpoint(ContentUnderstanding),
                Flag("--modality"),
                Literal(modality.to_string()),
                Flag("--use-case"),
                UseCase,
            ],
            vec![ContentUnderstanding],
        )
    };

    vec![
        python_stage(
            python,
            "create-search-index",
            "01_create_search_index.py",
            vec![
                Flag("--search-endpoint"),
                Endpoint(Search),
                Flag("--openai-endpoint"),
                Endpoint(AiServices),
                Flag("--embedding-model"),
                EmbeddingModel,
            ],
            vec![Search, AiServices],
        ),
        template("text"),
        template("audio"),
        python_stage(
            python,
            "create-sql-user",
            "create_sql_user_and_role.py",
            vec![
                Flag("--server"),
                Endpoint(Sql),
                Flag("--database"),
                Database,
                Flag("--identity-client-id"),
                SqlIdentityClientId,
                Flag("--identity-name"),
                SqlIdentityName,
            ],
            vec![Sql],
        ),
        python_stage(
            python,
            "ingest-sample-data",
            "03_process_data.py",
            vec![
                Flag("--search-endpoint"),
                Endpoint(Search),
                Flag("--storage-account"),
                Name(Storage),
                Flag("--container"),
                Container,
                Flag("--sql-server"),
                Endpoint(Sql),
                Flag("--sql-database"),
                Database,
                Flag("--ai-endpoint"),
                Endpoint(AiServices),
                Flag("--embedding-model"),
                EmbeddingModel,
                Flag("--chat-model"),
                ChatModel,
                Flag("--use-case"),
                UseCase,
                Flag("--data-dir"),
                SampleDataDir,
            ],
            vec![Search, Storage, Sql, AiServices],
        ),
    ]
}
