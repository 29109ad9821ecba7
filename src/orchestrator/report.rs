use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Linear run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Extracting,
    Diffing,
    Uploading,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Diffing => "diffing",
            Self::Uploading => "uploading",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every batch was attempted. Per-article failures are still possible.
    Completed,
    /// Cancelled between batches; the rest is picked up by the next run.
    Interrupted,
    /// No candidate set could be formed.
    Fatal,
}

/// Final summary of one run. Built once by the orchestrator when the run
/// reaches `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub articles_seen: usize,
    pub articles_new_or_changed: usize,
    pub articles_uploaded: usize,
    pub articles_failed: usize,
    pub articles_skipped: usize,
    pub articles_removed: usize,
    pub batches: usize,
    pub store_errors: usize,
    pub outcome: RunOutcome,
    pub fatal_error: Option<String>,
}

impl RunResult {
    pub fn is_fatal(&self) -> bool {
        self.outcome == RunOutcome::Fatal
    }
}

/// Counters accumulated while a run is in flight.
#[derive(Debug, Default)]
pub(crate) struct RunTally {
    pub seen: usize,
    pub new_or_changed: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub removed: usize,
    pub batches: usize,
    pub store_errors: usize,
}

impl RunTally {
    pub fn finish(
        self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        outcome: RunOutcome,
        fatal_error: Option<String>,
    ) -> RunResult {
        RunResult {
            run_id,
            started_at,
            finished_at: Utc::now(),
            articles_seen: self.seen,
            articles_new_or_changed: self.new_or_changed,
            articles_uploaded: self.uploaded,
            articles_failed: self.failed,
            articles_skipped: self.skipped,
            articles_removed: self.removed,
            batches: self.batches,
            store_errors: self.store_errors,
            outcome,
            fatal_error,
        }
    }
}
