use crate::domain::payout::PayoutState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    /// A payout reached SUCCESS or FAILED.
    PayoutResolved,
    /// A dispatch request was rejected.
    DispatchFailed,
    /// A payout stayed dispatched past the staleness ceiling.
    StalePayout,
}

/// Event handed to the notifier collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub beneficiary_id: String,
    pub category: NotificationCategory,
    pub payout_reference: String,
    /// Ledger state at the time of the event, if the payout has a ledger row.
    pub outcome: Option<PayoutState>,
    pub reason: Option<String>,
}
