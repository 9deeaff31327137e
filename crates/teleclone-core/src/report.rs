use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::TransferMode;

/// Per-item tallies from a consumer stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    /// Items taken off the queue.
    pub received: usize,
    /// Forwards/sends that succeeded.
    pub delivered: usize,
    /// Items intentionally not sent (empty records, failed downloads/uploads).
    pub skipped: usize,
    /// Forwards/sends the service rejected.
    pub failed: usize,
    pub cancelled: bool,
}

/// How a run ended. Resolution failures never get this far: they surface as `Err`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The whole history was scanned and every item handed to the consumer.
    Completed,
    /// A history page failed; only what was scanned before it was transferred.
    Partial { reason: String },
    Cancelled,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub mode: TransferMode,
    pub source_title: String,
    pub destination_title: String,
    pub outcome: RunOutcome,
    pub pages: usize,
    pub fetched: usize,
    pub consumer: StageReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// One-line human summary for the final log line.
    pub fn summary(&self) -> String {
        let status = match &self.outcome {
            RunOutcome::Completed => "completed".to_string(),
            RunOutcome::Partial { reason } => format!("partial ({reason})"),
            RunOutcome::Cancelled => "cancelled".to_string(),
        };
        let secs = (self.finished_at - self.started_at).num_seconds();
        format!(
            "{} transfer '{}' -> '{}' {status}: {} delivered, {} skipped, {} failed of {} fetched in {secs}s",
            self.mode,
            self.source_title,
            self.destination_title,
            self.consumer.delivered,
            self.consumer.skipped,
            self.consumer.failed,
            self.fetched,
        )
    }
}
