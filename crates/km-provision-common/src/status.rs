//! Per-stage and per-resource outcome codes

use serde::{Deserialize, Serialize};

/// Status of a pipeline stage within one run
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
pub enum StageStatus {
    #[default]
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    /// Whether the stage reached a final state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageStatus::Pending)
    }
}

/// What happened to one resource slot during a run
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
    strum::EnumIter,
)]
pub enum ResourceOutcome {
    /// Elevated for the run and put back afterwards
    #[strum(serialize = "elevated + restored")]
    ElevatedRestored,
    /// Already reachable, nothing changed
    #[strum(serialize = "already reachable")]
    AlreadyReachable,
    /// Optional slot without a configured value
    #[strum(serialize = "skipped (not configured)")]
    SkippedNotConfigured,
    /// Optional slot configured but absent in the subscription
    #[strum(serialize = "skipped (not found)")]
    SkippedNotFound,
    /// Snapshot could not be read, resource left untouched
    #[strum(serialize = "capture failed")]
    CaptureFailed,
    /// Elevation call failed
    #[strum(serialize = "elevation failed")]
    ElevationFailed,
    /// Elevated but restoration did not complete
    #[strum(serialize = "restore failed")]
    RestoreFailed,
    /// Captured only, no elevation attempted
    #[strum(serialize = "captured")]
    Captured,
}

impl ResourceOutcome {
    /// Whether this outcome should be counted as a failure in the report
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ResourceOutcome::ElevationFailed | ResourceOutcome::RestoreFailed
        )
    }

    /// Whether the resource may be left more exposed than before the run
    pub fn is_cleanup_failure(&self) -> bool {
        matches!(self, ResourceOutcome::RestoreFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_outcomes_are_not_failures() {
        assert!(!ResourceOutcome::SkippedNotConfigured.is_failure());
        assert!(!ResourceOutcome::SkippedNotFound.is_failure());
        assert!(!ResourceOutcome::CaptureFailed.is_failure());
        assert!(ResourceOutcome::RestoreFailed.is_cleanup_failure());
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(
            ResourceOutcome::SkippedNotConfigured.to_string(),
            "skipped (not configured)"
        );
        assert_eq!(StageStatus::Skipped.to_string(), "Skipped");
    }

    #[test]
    fn test_terminal_status() {
        assert!(!StageStatus::Pending.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
    }
}
