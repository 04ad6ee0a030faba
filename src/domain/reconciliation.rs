use crate::domain::payout::{Outcome, PayoutId, ResolutionSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Two resolution attempts for the same instruction disagreeing on outcome.
///
/// The later attempt is never applied; the conflict is kept for manual audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConflict {
    pub payout_id: PayoutId,
    pub reference: String,
    /// Outcome already stored in the ledger.
    pub recorded: Outcome,
    /// Outcome carried by the rejected attempt.
    pub reported: Outcome,
    pub source: ResolutionSource,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

/// Summary of one reconciliation sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRun {
    pub id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Dispatched instructions last updated at or before this instant were eligible.
    pub cutoff: Option<DateTime<Utc>>,
    pub examined: Vec<String>,
    pub resolved_success: usize,
    pub resolved_failed: usize,
    pub still_pending: usize,
    pub stale_alerts: usize,
    pub conflicts: Vec<ResolutionConflict>,
}

impl ReconciliationRun {
    pub fn start(trigger: RunTrigger, cutoff: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            trigger,
            started_at: now,
            finished_at: now,
            cutoff,
            examined: Vec::new(),
            resolved_success: 0,
            resolved_failed: 0,
            still_pending: 0,
            stale_alerts: 0,
            conflicts: Vec::new(),
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    pub fn resolved(&self) -> usize {
        self.resolved_success + self.resolved_failed
    }
}
