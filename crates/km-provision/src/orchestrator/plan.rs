//! Dry-run planning: what a run would change, computed from read-only calls

use super::{Orchestrator, ResourceLine, RunReport};
use crate::control_plane::CloudControlPlane;
use crate::elevator::plan;
use crate::grants::RoleGrantor;
use crate::pipeline::{StageContext, StageExecutor, StageLine};
use crate::resolver::{ResolvedResources, ResourceSlot, SlotResolution};
use crate::snapshot::{CaptureFailure, Snapshot};
use chrono::{DateTime, Utc};
use km_provision_common::{ResourceOutcome, StageStatus};
use strum::IntoEnumIterator;

impl<C: CloudControlPlane, E: StageExecutor> Orchestrator<'_, C, E> {
    pub(super) async fn dry_run_report(
        &self,
        run_id: String,
        started_at: DateTime<Utc>,
        resources: &ResolvedResources,
        snapshots: &[Snapshot],
        capture_failures: &[CaptureFailure],
    ) -> RunReport {
        let settings = &resources.settings;
        let grants = RoleGrantor::new(
            self.cp,
            settings.principal_id.as_str(),
            settings.principal_type,
            self.options.propagation.clone(),
        )
        .preview(&self.options.grant_plan, resources)
        .await;

        let ctx = StageContext {
            resources,
            scripts_dir: self.options.scripts_dir.clone(),
            data_dir: self.options.data_dir.clone(),
        };
        let stages = self
            .options
            .stages
            .iter()
            .map(|stage| match stage.render_args(&ctx) {
                Ok(args) => StageLine {
                    name: stage.name.clone(),
                    status: StageStatus::Pending,
                    detail: Some(format!("{} {}", stage.program, args.join(" "))),
                },
                Err(slot) => StageLine {
                    name: stage.name.clone(),
                    status: StageStatus::Skipped,
                    detail: Some(format!("'{slot}' not available")),
                },
            })
            .collect();

        let resource_lines = ResourceSlot::iter()
            .map(|slot| planned_line(slot, resources, snapshots, capture_failures, &self.options.temp_rule_name))
            .collect();

        RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: true,
            resources: resource_lines,
            grants,
            stages,
            warnings: capture_failures
                .iter()
                .map(|f| format!("could not capture '{}' ({}): {}", f.slot, f.resource, f.error))
                .collect(),
            errors: Vec::new(),
            cleanup_failed: false,
            exit_code: 0,
        }
    }
}

fn planned_line(
    slot: ResourceSlot,
    resources: &ResolvedResources,
    snapshots: &[Snapshot],
    capture_failures: &[CaptureFailure],
    temp_rule_name: &str,
) -> ResourceLine {
    let mut line = ResourceLine {
        slot,
        resource: None,
        outcome: ResourceOutcome::Captured,
        changes: Vec::new(),
        detail: None,
    };

    match resources.resolution(slot) {
        SlotResolution::NotConfigured => line.outcome = ResourceOutcome::SkippedNotConfigured,
        SlotResolution::NotFound { resource, reason } => {
            line.resource = Some(resource.name().to_string());
            line.outcome = ResourceOutcome::SkippedNotFound;
            line.detail = Some(reason.clone());
        }
        SlotResolution::Resolved(resource) => {
            line.resource = Some(resource.name().to_string());
            if let Some(snapshot) = snapshots.iter().find(|s| s.slot == slot) {
                let deltas = plan(snapshot, temp_rule_name);
                if deltas.is_noop() {
                    line.outcome = ResourceOutcome::AlreadyReachable;
                }
                line.changes = deltas.describe();
            } else if let Some(failure) = capture_failures.iter().find(|f| f.slot == slot) {
                line.outcome = ResourceOutcome::CaptureFailed;
                line.detail = Some(failure.error.to_string());
            }
        }
    }

    line
}
