//! Run output handed to the exporter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipharvest_clipboard::ClipboardAssociation;
use shipharvest_core_types::{OrderRecord, RunId};

/// Why the run ended.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    OperatorStop,
    DuplicateOrderStreak,
    NavigationFailure,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub orders_requested: u32,
    pub orders_committed: u32,
    pub fields_failed: u32,
    pub retries_used: u32,
    pub duplicates_encountered: u32,
    pub stop_reason: StopReason,
}

/// Everything a run produced. Each record carries the best-available
/// clipboard association; low-confidence content is retained with its
/// review flag, never dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: Vec<OrderRecord>,
    pub associations: Vec<ClipboardAssociation>,
    pub summary: RunSummary,
}

impl RunReport {
    /// Associations flagged for review before export.
    pub fn review_pending(&self) -> usize {
        self.associations.iter().filter(|a| a.needs_review).count()
    }
}
