use super::notification::Notification;
use super::payout::{
    CorrelationHandle, Creation, NewPayout, PayoutId, PayoutInstruction, Resolution, ResolveKey,
    ResolveResult,
};
use super::provider::{ProviderAcceptance, ProviderError, ProviderStatus, SubmitRequest};
use super::reconciliation::ReconciliationRun;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Durable store of payout instructions.
///
/// Every mutating method is a single atomic conditional update on the
/// instruction's current state. Implementations must never split the check
/// and the write across an await point.
#[async_trait]
pub trait PayoutLedger: Send + Sync {
    /// Creates a `CREATED` instruction, or returns the stored one for a known reference.
    async fn create(&self, payout: NewPayout) -> Result<Creation>;

    /// `CREATED -> DISPATCHED`, storing the provider handle and its aliases.
    async fn mark_dispatched(
        &self,
        id: PayoutId,
        handle: CorrelationHandle,
        aliases: Vec<String>,
    ) -> Result<PayoutInstruction>;

    /// Counts one dispatch round and remembers its failure, if any.
    async fn record_attempt(&self, id: PayoutId, error: Option<String>)
    -> Result<PayoutInstruction>;

    /// `DISPATCHED -> SUCCESS | FAILED`. Resolving a terminal instruction is a no-op
    /// reported with `applied == false`.
    async fn resolve(&self, key: &ResolveKey, resolution: Resolution) -> Result<ResolveResult>;

    /// Sets the stale-alert marker; `true` only for the call that set it.
    async fn mark_stale_alerted(&self, id: PayoutId) -> Result<bool>;

    /// Dispatched instructions whose last update is at least `older_than` ago.
    async fn list_unresolved(&self, older_than: Duration) -> Result<Vec<PayoutInstruction>>;

    async fn get(&self, id: PayoutId) -> Result<Option<PayoutInstruction>>;

    async fn find_by_reference(&self, reference: &str) -> Result<Option<PayoutInstruction>>;

    /// Looks an instruction up by its correlation handle or any of its aliases.
    async fn find_by_handle(&self, identifier: &str) -> Result<Option<PayoutInstruction>>;
}

/// Audit trail of reconciliation sweeps.
#[async_trait]
pub trait ReconciliationLog: Send + Sync {
    async fn record(&self, run: ReconciliationRun) -> Result<()>;

    /// Most recent runs first.
    async fn recent(&self, limit: usize) -> Result<Vec<ReconciliationRun>>;
}

/// Outbound adapter to one payment rail.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn submit(
        &self,
        request: &SubmitRequest,
    ) -> std::result::Result<ProviderAcceptance, ProviderError>;

    async fn query_status(
        &self,
        handle: &CorrelationHandle,
    ) -> std::result::Result<ProviderStatus, ProviderError>;
}

/// User-facing notification delivery. Fire-and-forget from the ledger's side:
/// a delivery failure never rolls back or replays a resolution.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

pub type SharedLedger = Arc<dyn PayoutLedger>;
pub type SharedReconciliationLog = Arc<dyn ReconciliationLog>;
pub type SharedGateway = Arc<dyn ProviderGateway>;
pub type SharedNotifier = Arc<dyn Notifier>;
