//! Run orchestration
//!
//! Resolve, snapshot, elevate, grant, run the pipeline, restore. The restore
//! guard is taken as soon as snapshots exist and released on every path out
//! of the forward phase: normal completion, a failed step, a panic, or an
//! interrupt.

mod plan;
pub mod recover;
pub mod report;
pub mod signal;
pub mod status;
pub mod teardown;

pub use report::{ErrorLine, ResourceLine, RunReport};

use crate::control_plane::CloudControlPlane;
use crate::elevator::{ElevationOutcome, Elevator};
use crate::error::OrchestratorError;
use crate::grants::{GrantLine, GrantRequirement, RoleGrantor, default_grant_plan};
use crate::pipeline::{
    PipelineInvoker, PipelineResult, PipelineStage, StageContext, StageExecutor, StageLine,
};
use crate::resolver::{Parameters, ResolvedResources, ResourceSlot, SlotResolution, resolve};
use crate::restore::{ElevationRegistry, RestoreGuard, RestoreReport};
use crate::snapshot::{CaptureFailure, Snapshot, capture_all};
use crate::wait::exponential_policy;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use km_provision_common::{ResourceOutcome, RetryPolicy, defaults};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use strum::IntoEnumIterator;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Knobs of a run that are not invocation parameters
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Name of the full-range rule created on database servers
    pub temp_rule_name: String,
    pub grant_plan: Vec<GrantRequirement>,
    pub stages: Vec<PipelineStage>,
    pub scripts_dir: PathBuf,
    pub data_dir: PathBuf,
    /// Polling policy while a new grant propagates
    pub propagation: RetryPolicy,
    /// Mirror elevated state to this file for `restore` after a hard kill
    pub snapshot_file: Option<PathBuf>,
    pub dry_run: bool,
}

impl RunOptions {
    pub fn new(stages: Vec<PipelineStage>) -> Self {
        Self {
            temp_rule_name: defaults::DEFAULT_TEMP_RULE_NAME.to_string(),
            grant_plan: default_grant_plan(),
            stages,
            scripts_dir: PathBuf::from(defaults::DEFAULT_SCRIPTS_DIR),
            data_dir: PathBuf::from(defaults::DEFAULT_DATA_DIR),
            propagation: exponential_policy(
                defaults::DEFAULT_PROPAGATION_ATTEMPTS,
                defaults::DEFAULT_MIN_POLL_DELAY,
                defaults::DEFAULT_MAX_POLL_DELAY,
            ),
            snapshot_file: None,
            dry_run: false,
        }
    }

    /// Fail the run when a grant that is awaited does not propagate in time
    pub fn with_strict_propagation(mut self) -> Self {
        self.grant_plan = self
            .grant_plan
            .into_iter()
            .map(|req| {
                if req.await_propagation {
                    req.failing_on_timeout()
                } else {
                    req
                }
            })
            .collect();
        self
    }
}

/// How one snapshot fared in the forward phase
#[derive(Debug, Clone)]
enum ElevationRecord {
    Reachable,
    Elevated(Vec<String>),
    Failed(String),
}

/// What the forward phase got done before it returned or was dropped
#[derive(Debug, Default)]
struct ForwardState {
    elevations: BTreeMap<ResourceSlot, ElevationRecord>,
    grants: Vec<GrantLine>,
    stages: Option<Vec<StageLine>>,
    errors: Vec<OrchestratorError>,
    warnings: Vec<String>,
    /// Why the pipeline was not started
    halted: Option<&'static str>,
}

/// How the forward phase ended
enum ForwardEnd {
    Completed,
    Interrupted,
    Panicked(String),
}

/// Drives one provisioning run
pub struct Orchestrator<'a, C, E> {
    cp: &'a C,
    invoker: PipelineInvoker<E>,
    options: RunOptions,
    cancel: CancellationToken,
}

impl<'a, C: CloudControlPlane, E: StageExecutor> Orchestrator<'a, C, E> {
    pub fn new(cp: &'a C, executor: E, options: RunOptions) -> Self {
        Self {
            cp,
            invoker: PipelineInvoker::new(executor),
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the forward phase when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run end to end
    ///
    /// Returns `Err` only for failures before any mutation (invalid input, a
    /// required resource that does not exist, an interrupt during
    /// resolution). Everything after that is reported in the [`RunReport`].
    pub async fn run(&self, params: &Parameters) -> Result<RunReport, OrchestratorError> {
        let resources = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(OrchestratorError::Interrupted),
            resolved = resolve(self.cp, params) => resolved?,
        };

        let run_id = Uuid::now_v7().to_string();
        let started_at = Utc::now();
        info!(
            run_id = %run_id,
            resource_group = %resources.settings.resource_group,
            dry_run = self.options.dry_run,
            "Starting provisioning run"
        );

        let (snapshots, capture_failures) = capture_all(self.cp, &resources).await;

        if self.options.dry_run {
            return Ok(self
                .dry_run_report(run_id, started_at, &resources, &snapshots, &capture_failures)
                .await);
        }

        let registry = match &self.options.snapshot_file {
            Some(path) => ElevationRegistry::with_snapshot_file(
                path,
                &run_id,
                &resources.settings.resource_group,
            ),
            None => ElevationRegistry::new(),
        };
        let guard = RestoreGuard::new(self.cp, registry.clone());

        let mut forward = ForwardState::default();
        let end = {
            let phase = AssertUnwindSafe(self.forward_phase(
                &resources,
                &snapshots,
                &registry,
                &mut forward,
            ))
            .catch_unwind();

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => ForwardEnd::Interrupted,
                result = phase => match result {
                    Ok(()) => ForwardEnd::Completed,
                    Err(payload) => ForwardEnd::Panicked(panic_message(payload.as_ref())),
                },
            }
        };

        match &end {
            ForwardEnd::Completed => {}
            ForwardEnd::Interrupted => warn!("Forward phase interrupted"),
            ForwardEnd::Panicked(message) => error!(panic = %message, "Forward phase panicked"),
        }

        info!(count = registry.pending().len(), "Restoring elevated resources");
        let restore = guard.restore_all().await;

        Ok(self.build_report(
            run_id,
            started_at,
            &resources,
            &capture_failures,
            forward,
            end,
            &restore,
        ))
    }

    async fn forward_phase(
        &self,
        resources: &ResolvedResources,
        snapshots: &[Snapshot],
        registry: &ElevationRegistry,
        state: &mut ForwardState,
    ) {
        let elevator = Elevator::new(self.cp, registry.clone(), &self.options.temp_rule_name);
        for snapshot in snapshots {
            let record = match elevator.elevate(snapshot).await {
                Ok(ElevationOutcome::AlreadyReachable) => ElevationRecord::Reachable,
                Ok(ElevationOutcome::Elevated(plan)) => ElevationRecord::Elevated(plan.describe()),
                Ok(ElevationOutcome::AlreadyElevated) => ElevationRecord::Elevated(Vec::new()),
                Err(e) => {
                    error!(slot = %snapshot.slot, error = %e, "Elevation failed");
                    let record = ElevationRecord::Failed(error_chain(&e));
                    state.errors.push(e);
                    record
                }
            };
            state.elevations.insert(snapshot.slot, record);
        }
        if !state.errors.is_empty() {
            state.halted = Some("not run: elevation failed");
            return;
        }

        let settings = &resources.settings;
        let grantor = RoleGrantor::new(
            self.cp,
            settings.principal_id.as_str(),
            settings.principal_type,
            self.options.propagation.clone(),
        )
        .with_cancellation(self.cancel.clone());
        let phase = grantor.ensure_all(&self.options.grant_plan, resources).await;
        let satisfied = phase.is_satisfied();
        state.grants = phase.lines;
        state.warnings.extend(phase.warnings);
        state.errors.extend(phase.errors);
        if !satisfied {
            state.halted = Some("not run: a required role grant is missing");
            return;
        }

        let ctx = StageContext {
            resources,
            scripts_dir: self.options.scripts_dir.clone(),
            data_dir: self.options.data_dir.clone(),
        };
        let result = self.invoker.run(&self.options.stages, &ctx).await;
        state.stages = Some(result.stages);
        state.errors.extend(result.errors);
    }

    #[allow(clippy::too_many_arguments)]
    fn build_report(
        &self,
        run_id: String,
        started_at: DateTime<Utc>,
        resources: &ResolvedResources,
        capture_failures: &[CaptureFailure],
        forward: ForwardState,
        end: ForwardEnd,
        restore: &RestoreReport,
    ) -> RunReport {
        let mut warnings: Vec<String> = capture_failures
            .iter()
            .map(|f| format!("could not capture '{}' ({}): {}", f.slot, f.resource, f.error))
            .collect();
        warnings.extend(forward.warnings);

        let mut errors: Vec<ErrorLine> = forward
            .errors
            .iter()
            .map(|e| ErrorLine {
                class: e.class().to_string(),
                message: error_chain(e),
            })
            .collect();

        let skip_reason = match &end {
            ForwardEnd::Completed => forward.halted.unwrap_or("not run"),
            ForwardEnd::Interrupted => {
                let e = OrchestratorError::Interrupted;
                errors.push(ErrorLine {
                    class: e.class().to_string(),
                    message: e.to_string(),
                });
                "not run: interrupted"
            }
            ForwardEnd::Panicked(message) => {
                errors.push(ErrorLine {
                    class: "panic".to_string(),
                    message: message.clone(),
                });
                "not run: forward phase panicked"
            }
        };
        let stages = forward.stages.unwrap_or_else(|| {
            PipelineResult::all_skipped(&self.options.stages, skip_reason).stages
        });

        let resource_lines = ResourceSlot::iter()
            .map(|slot| {
                resource_line(slot, resources, capture_failures, &forward.elevations, restore)
            })
            .collect();

        let cleanup_failed = !restore.is_clean();
        if cleanup_failed {
            let names: Vec<&str> = restore.failed.iter().map(|f| f.resource.name()).collect();
            warn!(resources = ?names, "Cleanup failed: some resources are still elevated");
            warnings.push(format!(
                "cleanup failed: {} still elevated; run `km-provision restore` with the snapshot file or fix manually",
                names.join(", ")
            ));
        }

        let exit_code = if errors.is_empty() && !cleanup_failed { 0 } else { 1 };

        RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: false,
            resources: resource_lines,
            grants: forward.grants,
            stages,
            warnings,
            errors,
            cleanup_failed,
            exit_code,
        }
    }
}

fn resource_line(
    slot: ResourceSlot,
    resources: &ResolvedResources,
    capture_failures: &[CaptureFailure],
    elevations: &BTreeMap<ResourceSlot, ElevationRecord>,
    restore: &RestoreReport,
) -> ResourceLine {
    let line = |resource: Option<&str>, outcome, detail: Option<String>| ResourceLine {
        slot,
        resource: resource.map(str::to_string),
        outcome,
        changes: Vec::new(),
        detail,
    };

    let resource = match resources.resolution(slot) {
        SlotResolution::NotConfigured => {
            return line(None, ResourceOutcome::SkippedNotConfigured, None);
        }
        SlotResolution::NotFound { resource, reason } => {
            return line(
                Some(resource.name()),
                ResourceOutcome::SkippedNotFound,
                Some(reason.clone()),
            );
        }
        SlotResolution::Resolved(resource) => resource,
    };
    let name = Some(resource.name());

    if let Some(failure) = capture_failures.iter().find(|f| f.slot == slot) {
        return line(
            name,
            ResourceOutcome::CaptureFailed,
            Some(failure.error.to_string()),
        );
    }
    if let Some(failure) = restore.failure_for(resource) {
        return line(
            name,
            ResourceOutcome::RestoreFailed,
            Some(failure.errors.join("; ")),
        );
    }

    match elevations.get(&slot) {
        Some(ElevationRecord::Reachable) => line(name, ResourceOutcome::AlreadyReachable, None),
        Some(ElevationRecord::Elevated(changes)) => ResourceLine {
            changes: changes.clone(),
            ..line(name, ResourceOutcome::ElevatedRestored, None)
        },
        Some(ElevationRecord::Failed(reason)) => {
            let detail = if restore.restored.contains(resource) {
                format!("{reason} (partial changes restored)")
            } else {
                reason.clone()
            };
            line(name, ResourceOutcome::ElevationFailed, Some(detail))
        }
        None => line(name, ResourceOutcome::Captured, None),
    }
}

/// Display an error followed by its sources
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(&format!(": {cause}"));
        source = cause.source();
    }
    message
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
