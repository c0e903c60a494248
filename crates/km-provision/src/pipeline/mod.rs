//! Pipeline invocation
//!
//! Stages run strictly in order. A failed stage marked `hard_failure` stops
//! the stages after it, which are reported as skipped; control always returns
//! to the caller so restoration still runs.

mod command;
mod stage;

pub use command::{CommandConfig, CommandOutcome, run_command_streaming};
pub use stage::{PipelineStage, StageArg, StageContext, default_pipeline};

use crate::error::OrchestratorError;
use km_provision_common::StageStatus;
use serde::Serialize;
use tracing::{error, info, warn};

/// Launches one stage process
#[allow(async_fn_in_trait)] // Awaited in place by the invoker
pub trait StageExecutor: Send + Sync {
    async fn execute(
        &self,
        stage: &str,
        program: &str,
        args: &[String],
    ) -> anyhow::Result<CommandOutcome>;
}

/// Runs stages as child processes
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    config: CommandConfig,
}

impl ProcessExecutor {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }
}

impl StageExecutor for ProcessExecutor {
    async fn execute(
        &self,
        stage: &str,
        program: &str,
        args: &[String],
    ) -> anyhow::Result<CommandOutcome> {
        run_command_streaming(stage, program, args, &self.config).await
    }
}

/// One row of the stage section of the run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageLine {
    pub name: String,
    pub status: StageStatus,
    pub detail: Option<String>,
}

/// Per-stage outcome of a pipeline run
#[derive(Debug, Default)]
pub struct PipelineResult {
    pub stages: Vec<StageLine>,
    /// One entry per failed stage
    pub errors: Vec<OrchestratorError>,
}

impl PipelineResult {
    /// Every stage that ran succeeded
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn status_of(&self, name: &str) -> Option<StageStatus> {
        self.stages.iter().find(|s| s.name == name).map(|s| s.status)
    }

    /// Mark every stage skipped without launching anything
    pub fn all_skipped(stages: &[PipelineStage], reason: &str) -> Self {
        Self {
            stages: stages
                .iter()
                .map(|s| StageLine {
                    name: s.name.clone(),
                    status: StageStatus::Skipped,
                    detail: Some(reason.to_string()),
                })
                .collect(),
            errors: Vec::new(),
        }
    }
}

/// Runs an ordered list of stages
pub struct PipelineInvoker<E> {
    executor: E,
}

impl<E: StageExecutor> PipelineInvoker<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub async fn run(&self, stages: &[PipelineStage], ctx: &StageContext<'_>) -> PipelineResult {
        let mut result = PipelineResult::default();
        let mut halted_by: Option<&str> = None;

        for stage in stages {
            let mut line = StageLine {
                name: stage.name.clone(),
                status: StageStatus::Pending,
                detail: None,
            };

            if let Some(failed) = halted_by {
                line.status = StageStatus::Skipped;
                line.detail = Some(format!("not run: '{failed}' failed"));
                result.stages.push(line);
                continue;
            }

            let args = match stage.missing_slot(ctx.resources).map_or_else(
                || stage.render_args(ctx),
                Err,
            ) {
                Ok(args) => args,
                Err(slot) => {
                    info!(stage = %stage.name, slot = %slot, "Skipping stage, resource unavailable");
                    line.status = StageStatus::Skipped;
                    line.detail = Some(format!("'{slot}' not available"));
                    result.stages.push(line);
                    continue;
                }
            };

            let reason = match self.executor.execute(&stage.name, &stage.program, &args).await {
                Ok(CommandOutcome::Succeeded) => None,
                Ok(CommandOutcome::Failed(Some(code))) => Some(format!("exited with code {code}")),
                Ok(CommandOutcome::Failed(None)) => Some("terminated by signal".to_string()),
                Ok(CommandOutcome::TimedOut) => Some("timed out".to_string()),
                Err(e) => Some(format!("{e:#}")),
            };

            match reason {
                None => {
                    info!(stage = %stage.name, "Stage succeeded");
                    line.status = StageStatus::Succeeded;
                }
                Some(reason) => {
                    if stage.hard_failure {
                        error!(stage = %stage.name, %reason, "Stage failed, stopping pipeline");
                        halted_by = Some(&stage.name);
                    } else {
                        warn!(stage = %stage.name, %reason, "Stage failed, continuing");
                    }
                    line.status = StageStatus::Failed;
                    line.detail = Some(reason.clone());
                    result.errors.push(OrchestratorError::PipelineStage {
                        stage: stage.name.clone(),
                        reason,
                    });
                }
            }
            result.stages.push(line);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ResolvedResources, ResolvedSettings, ResourceSlot, SlotResolution};
    use km_provision_common::{PrincipalType, ResourceKind, ResourceRef, UseCase};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records launches; fails the named stages
    #[derive(Default)]
    struct ScriptedExecutor {
        failing: Vec<&'static str>,
        launched: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl StageExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            stage: &str,
            _program: &str,
            args: &[String],
        ) -> anyhow::Result<CommandOutcome> {
            self.launched
                .lock()
                .unwrap()
                .push((stage.to_string(), args.to_vec()));
            if self.failing.iter().any(|f| *f == stage) {
                Ok(CommandOutcome::Failed(Some(2)))
            } else {
                Ok(CommandOutcome::Succeeded)
            }
        }
    }

    fn resources() -> ResolvedResources {
        let search = ResourceRef::new(
            ResourceKind::SearchService,
            "km-search",
            "rg-km",
            "00000000-0000-0000-0000-000000000001",
        );
        let mut slots = BTreeMap::new();
        slots.insert(ResourceSlot::Search, SlotResolution::Resolved(search));
        ResolvedResources {
            slots,
            settings: ResolvedSettings {
                subscription_id: "00000000-0000-0000-0000-000000000001".into(),
                resource_group: "rg-km".into(),
                principal_id: "11111111-2222-3333-4444-555555555555".into(),
                principal_type: PrincipalType::User,
                storage_container: "data".into(),
                search_endpoint: None,
                sql_database: "kmdb".into(),
                sql_identity_client_id: "22222222-2222-2222-2222-222222222222".into(),
                sql_identity_name: "km-app".into(),
                use_case: UseCase::Telecom,
                embedding_model: "emb".into(),
                chat_model: "chat".into(),
            },
        }
    }

    fn stage(name: &str, requires: Vec<ResourceSlot>) -> PipelineStage {
        PipelineStage {
            name: name.to_string(),
            program: "true".to_string(),
            args: vec![StageArg::Flag("--endpoint"), StageArg::Endpoint(ResourceSlot::Search)],
            hard_failure: true,
            requires,
        }
    }

    fn ctx(resources: &ResolvedResources) -> StageContext<'_> {
        StageContext {
            resources,
            scripts_dir: PathBuf::from("scripts"),
            data_dir: PathBuf::from("data"),
        }
    }

    #[tokio::test]
    async fn test_hard_failure_skips_remaining_stages() {
        let resources = resources();
        let executor = ScriptedExecutor {
            failing: vec!["two"],
            ..Default::default()
        };
        let invoker = PipelineInvoker::new(executor);
        let stages = [stage("one", vec![]), stage("two", vec![]), stage("three", vec![])];

        let result = invoker.run(&stages, &ctx(&resources)).await;

        assert_eq!(result.status_of("one"), Some(StageStatus::Succeeded));
        assert_eq!(result.status_of("two"), Some(StageStatus::Failed));
        assert_eq!(result.status_of("three"), Some(StageStatus::Skipped));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(invoker.executor.launched.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_soft_failure_continues() {
        let resources = resources();
        let invoker = PipelineInvoker::new(ScriptedExecutor {
            failing: vec!["one"],
            ..Default::default()
        });
        let mut soft = stage("one", vec![]);
        soft.hard_failure = false;

        let result = invoker.run(&[soft, stage("two", vec![])], &ctx(&resources)).await;

        assert_eq!(result.status_of("two"), Some(StageStatus::Succeeded));
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn test_stage_with_unavailable_slot_is_skipped() {
        let resources = resources();
        let invoker = PipelineInvoker::new(ScriptedExecutor::default());
        let stages = [
            stage("needs-cu", vec![ResourceSlot::ContentUnderstanding]),
            stage("index", vec![ResourceSlot::Search]),
        ];

        let result = invoker.run(&stages, &ctx(&resources)).await;

        assert_eq!(result.status_of("needs-cu"), Some(StageStatus::Skipped));
        assert_eq!(result.status_of("index"), Some(StageStatus::Succeeded));
        assert!(result.succeeded());

        let launched = invoker.executor.launched.lock().unwrap();
        assert_eq!(launched.len(), 1);
        assert_eq!(
            launched[0].1,
            vec!["--endpoint".to_string(), "https://km-search.search.windows.net".to_string()]
        );
    }
}
