use crate::application::resolution::{deliver, notify};
use crate::application::retry::RetryPolicy;
use crate::domain::notification::{Notification, NotificationCategory};
use crate::domain::payout::{Destination, NewPayout, PayoutId, PayoutInstruction, PayoutState};
use crate::domain::ports::{SharedGateway, SharedLedger, SharedNotifier};
use crate::domain::provider::SubmitRequest;
use crate::error::{PayoutError, Result};
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchConfig {
    /// Maximum number of provider submissions in flight per batch.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            retry: RetryPolicy::default(),
        }
    }
}

/// One item of a batch dispatch request, as received from the payroll layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub reference: String,
    #[serde(alias = "beneficiaryId")]
    pub beneficiary_id: String,
    pub amount: Decimal,
    pub destination: Destination,
}

/// A batch item that could not be read into a [`PayoutRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidItem {
    /// Whatever reference the item carried; empty when none could be read.
    pub reference: String,
    pub beneficiary_id: String,
    pub reason: String,
}

/// One entry of a batch as delivered by an input adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItem {
    Request(PayoutRequest),
    Invalid(InvalidItem),
}

impl From<PayoutRequest> for BatchItem {
    fn from(request: PayoutRequest) -> Self {
        BatchItem::Request(request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Accepted,
    Rejected,
}

/// Per-item answer of a batch dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub reference: String,
    pub outcome: DispatchOutcome,
    pub reason: Option<String>,
    /// Ledger state after the call; `None` when no instruction was recorded.
    pub state: Option<PayoutState>,
}

impl DispatchReport {
    fn accepted(instruction: &PayoutInstruction) -> Self {
        Self {
            reference: instruction.reference.clone(),
            outcome: DispatchOutcome::Accepted,
            reason: None,
            state: Some(instruction.state),
        }
    }

    fn rejected(reference: &str, state: Option<PayoutState>, reason: String) -> Self {
        Self {
            reference: reference.to_string(),
            outcome: DispatchOutcome::Rejected,
            reason: Some(reason),
            state,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.outcome == DispatchOutcome::Accepted
    }
}

/// Marks an instruction as being submitted by this process until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<PayoutId>>,
    id: PayoutId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.id);
    }
}

/// Turns batches of payout requests into ledger instructions and provider submissions.
///
/// Resubmitting a batch is safe: references already dispatched or resolved are
/// reported as accepted without reaching the provider again, and only
/// instructions still in `CREATED` are submitted.
pub struct Dispatcher {
    ledger: SharedLedger,
    gateway: SharedGateway,
    notifier: SharedNotifier,
    config: DispatchConfig,
    in_flight: Mutex<HashSet<PayoutId>>,
}

impl Dispatcher {
    pub fn new(
        ledger: SharedLedger,
        gateway: SharedGateway,
        notifier: SharedNotifier,
        config: DispatchConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            notifier,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Dispatches a batch, returning one report per item in input order.
    ///
    /// Items repeating a reference within the batch are processed once and
    /// share the report of the first occurrence.
    pub async fn dispatch(&self, batch: Vec<PayoutRequest>) -> Vec<DispatchReport> {
        self.dispatch_items(batch.into_iter().map(BatchItem::from).collect())
            .await
    }

    /// Like [`Dispatcher::dispatch`], with unreadable items rejected in place.
    pub async fn dispatch_items(&self, batch: Vec<BatchItem>) -> Vec<DispatchReport> {
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        let mut unique = Vec::new();
        let mut slots = Vec::with_capacity(batch.len());
        for item in batch {
            let key = match &item {
                BatchItem::Request(request) => Some(request.reference.trim().to_string()),
                BatchItem::Invalid(_) => None,
            };
            let slot = match key {
                Some(key) => *first_seen.entry(key).or_insert_with(|| {
                    unique.push(item);
                    unique.len() - 1
                }),
                None => {
                    unique.push(item);
                    unique.len() - 1
                }
            };
            slots.push(slot);
        }

        info!(
            items = slots.len(),
            unique = unique.len(),
            "Dispatching payout batch"
        );

        let reports: Vec<DispatchReport> = stream::iter(unique)
            .map(|item| self.dispatch_item(item))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        slots.into_iter().map(|slot| reports[slot].clone()).collect()
    }

    /// Explicit re-dispatch of one instruction left in `CREATED` by an earlier rejection.
    pub async fn redispatch(&self, reference: &str) -> Result<DispatchReport> {
        let instruction = self
            .ledger
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| PayoutError::NotFound(reference.to_string()))?;

        if instruction.state != PayoutState::Created {
            return Ok(DispatchReport::accepted(&instruction));
        }
        Ok(self.submit(instruction).await)
    }

    async fn dispatch_item(&self, item: BatchItem) -> DispatchReport {
        match item {
            BatchItem::Request(request) => self.dispatch_one(request).await,
            BatchItem::Invalid(invalid) => {
                warn!(
                    reference = %invalid.reference,
                    "Unreadable payout item: {}",
                    invalid.reason
                );
                self.reject_unrecorded(
                    &invalid.reference,
                    &invalid.beneficiary_id,
                    invalid.reason,
                )
                .await
            }
        }
    }

    async fn dispatch_one(&self, request: PayoutRequest) -> DispatchReport {
        let payout = match NewPayout::new(
            &request.reference,
            &request.beneficiary_id,
            request.amount,
            request.destination.clone(),
        ) {
            Ok(payout) => payout,
            Err(e) => {
                warn!(reference = %request.reference, "Payout request rejected: {e}");
                return self
                    .reject_unrecorded(&request.reference, &request.beneficiary_id, e.to_string())
                    .await;
            }
        };

        let creation = match self.ledger.create(payout.clone()).await {
            Ok(creation) => creation,
            Err(e) => {
                error!(reference = %payout.reference, "Failed to record payout: {e}");
                return self
                    .reject_unrecorded(
                        &request.reference,
                        &request.beneficiary_id,
                        format!("Ledger unavailable: {e}"),
                    )
                    .await;
            }
        };

        if creation.is_duplicate() && !creation.instruction().same_details(&payout) {
            warn!(
                reference = %payout.reference,
                "Reference reused for a different payout"
            );
            return self
                .reject_unrecorded(
                    &request.reference,
                    &request.beneficiary_id,
                    "Reference already used for a different payout".to_string(),
                )
                .await;
        }

        let instruction = creation.into_instruction();
        if instruction.state != PayoutState::Created {
            return DispatchReport::accepted(&instruction);
        }
        self.submit(instruction).await
    }

    fn claim(&self, id: PayoutId) -> Option<InFlight<'_>> {
        let claimed = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
        claimed.then(|| InFlight {
            set: &self.in_flight,
            id,
        })
    }

    async fn submit(&self, instruction: PayoutInstruction) -> DispatchReport {
        let Some(_claim) = self.claim(instruction.id) else {
            return DispatchReport::rejected(
                &instruction.reference,
                Some(instruction.state),
                "Dispatch already in progress".to_string(),
            );
        };

        // Another dispatch may have finished between create and claim.
        let instruction = match self.ledger.get(instruction.id).await {
            Ok(Some(current)) if current.state != PayoutState::Created => {
                return DispatchReport::accepted(&current);
            }
            Ok(Some(current)) => current,
            Ok(None) => instruction,
            Err(e) => {
                error!(reference = %instruction.reference, "Failed to reload payout: {e}");
                return self
                    .reject(&instruction, format!("Ledger unavailable: {e}"))
                    .await;
            }
        };

        let request = SubmitRequest {
            reference: instruction.reference.clone(),
            amount: instruction.amount,
            destination: instruction.destination.clone(),
        };
        let result = self
            .config
            .retry
            .call(|| self.gateway.submit(&request))
            .await;

        match result {
            Ok(acceptance) => {
                if let Err(e) = self.ledger.record_attempt(instruction.id, None).await {
                    warn!(reference = %instruction.reference, "Failed to record attempt: {e}");
                }
                let handle = acceptance.handle.clone();
                match self
                    .ledger
                    .mark_dispatched(instruction.id, acceptance.handle, acceptance.aliases)
                    .await
                {
                    Ok(dispatched) => {
                        info!(
                            reference = %dispatched.reference,
                            %handle,
                            "Payout dispatched"
                        );
                        DispatchReport::accepted(&dispatched)
                    }
                    Err(e) => {
                        error!(
                            reference = %instruction.reference,
                            %handle,
                            "Provider accepted payout but the ledger did not record it: {e}"
                        );
                        self.reject(
                            &instruction,
                            format!("Accepted by provider as {handle} but not recorded: {e}"),
                        )
                        .await
                    }
                }
            }
            Err(e) => {
                warn!(reference = %instruction.reference, "Payout submission failed: {e}");
                if let Err(record_error) = self
                    .ledger
                    .record_attempt(instruction.id, Some(e.to_string()))
                    .await
                {
                    warn!(
                        reference = %instruction.reference,
                        "Failed to record attempt: {record_error}"
                    );
                }
                self.reject(&instruction, e.to_string()).await
            }
        }
    }

    async fn reject(&self, instruction: &PayoutInstruction, reason: String) -> DispatchReport {
        notify(
            self.notifier.as_ref(),
            instruction,
            NotificationCategory::DispatchFailed,
            Some(reason.clone()),
        )
        .await;
        DispatchReport::rejected(&instruction.reference, Some(instruction.state), reason)
    }

    async fn reject_unrecorded(
        &self,
        reference: &str,
        beneficiary_id: &str,
        reason: String,
    ) -> DispatchReport {
        deliver(
            self.notifier.as_ref(),
            Notification {
                beneficiary_id: beneficiary_id.to_string(),
                category: NotificationCategory::DispatchFailed,
                payout_reference: reference.to_string(),
                outcome: None,
                reason: Some(reason.clone()),
            },
        )
        .await;
        DispatchReport::rejected(reference, None, reason)
    }
}
