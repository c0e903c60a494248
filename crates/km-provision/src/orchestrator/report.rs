//! End-of-run report
//!
//! Printed as tables to stdout and optionally written as JSON.

use crate::grants::GrantLine;
use crate::pipeline::StageLine;
use crate::resolver::ResourceSlot;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use km_provision_common::ResourceOutcome;
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// One row of the resource section
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceLine {
    pub slot: ResourceSlot,
    /// Resource name, when the slot was configured
    pub resource: Option<String>,
    pub outcome: ResourceOutcome,
    /// Elevation changes applied (or planned, for a dry run)
    pub changes: Vec<String>,
    pub detail: Option<String>,
}

/// A failure that affected the run's outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorLine {
    pub class: String,
    pub message: String,
}

/// Everything a run did, for humans and automation
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub resources: Vec<ResourceLine>,
    pub grants: Vec<GrantLine>,
    pub stages: Vec<StageLine>,
    pub warnings: Vec<String>,
    pub errors: Vec<ErrorLine>,
    /// Some resource could not be put back
    pub cleanup_failed: bool,
    pub exit_code: i32,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn resource(&self, slot: ResourceSlot) -> Option<&ResourceLine> {
        self.resources.iter().find(|r| r.slot == slot)
    }

    pub fn stage(&self, name: &str) -> Option<&StageLine> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        info!(path = %path.display(), "Run report written");
        Ok(())
    }

    /// Print the summary tables to stdout
    pub fn print_summary(&self) {
        let title = if self.dry_run { "Dry Run Plan" } else { "Run Summary" };
        println!("\n=== {title} ({}) ===\n", self.run_id);

        let mut resources = new_table(&["Slot", "Resource", "Outcome", "Changes"]);
        for line in &self.resources {
            let mut outcome = line.outcome.to_string();
            if let Some(detail) = &line.detail {
                outcome.push_str(&format!(": {detail}"));
            }
            resources.add_row(vec![
                Cell::new(line.slot),
                Cell::new(line.resource.as_deref().unwrap_or("-")),
                Cell::new(outcome),
                Cell::new(if line.changes.is_empty() {
                    "-".to_string()
                } else {
                    line.changes.join("\n")
                }),
            ]);
        }
        println!("Resources\n{resources}");

        if !self.grants.is_empty() {
            let mut grants = new_table(&["Role", "Scope", "Gating", "Status"]);
            for line in &self.grants {
                grants.add_row(vec![
                    Cell::new(line.role),
                    Cell::new(match &line.scope {
                        Some(scope) => scope.name().to_string(),
                        None => line.scope_slot.to_string(),
                    }),
                    Cell::new(line.gating),
                    Cell::new(match &line.status {
                        crate::grants::GrantStatus::Failed(reason) => format!("failed: {reason}"),
                        status => status.to_string(),
                    }),
                ]);
            }
            println!("\nGrants\n{grants}");
        }

        if !self.stages.is_empty() {
            let mut stages = new_table(&["Stage", "Status", "Detail"]);
            for line in &self.stages {
                stages.add_row(vec![
                    Cell::new(&line.name),
                    Cell::new(line.status),
                    Cell::new(line.detail.as_deref().unwrap_or("")),
                ]);
            }
            println!("\nStages\n{stages}");
        }

        for warning in &self.warnings {
            println!("warning: {warning}");
        }
        for error in &self.errors {
            println!("error ({}): {}", error.class, error.message);
        }

        let elapsed = self.finished_at - self.started_at;
        let verdict = match (self.succeeded(), self.cleanup_failed) {
            (true, _) => "succeeded",
            (false, true) => "failed (cleanup incomplete)",
            (false, false) => "failed",
        };
        println!("\nRun {verdict} in {}s", elapsed.num_seconds());
    }
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.iter().map(Cell::new).collect::<Vec<_>>());
    table
}
