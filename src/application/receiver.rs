use crate::application::resolution::settle;
use crate::domain::payout::{
    PayoutInstruction, PayoutState, Resolution, ResolutionSource, ResolveKey,
};
use crate::domain::ports::{SharedLedger, SharedNotifier};
use crate::domain::provider::ResultCode;
use crate::error::Result;
use tracing::{error, warn};

/// A provider callback normalized from its wire shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderNotification {
    /// Every identifier the payload carries for the transfer: provider handles,
    /// aliases and, for some rails, our own payout reference.
    pub identifiers: Vec<String>,
    pub result_code: ResultCode,
    pub reason: Option<String>,
    pub provider_reference: Option<String>,
}

/// What happened to one callback. Never surfaced to the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackDisposition {
    Resolved(PayoutState),
    AlreadyResolved,
    /// Already terminal with a different outcome; the callback was not applied.
    Conflict,
    Unmatched,
    Error(String),
}

/// Applies asynchronous provider notifications to the ledger.
pub struct CallbackReceiver {
    ledger: SharedLedger,
    notifier: SharedNotifier,
}

impl CallbackReceiver {
    pub fn new(ledger: SharedLedger, notifier: SharedNotifier) -> Self {
        Self { ledger, notifier }
    }

    /// Handles one callback. Internal failures are logged and reported in the
    /// disposition, never propagated.
    pub async fn receive(&self, notification: ProviderNotification) -> CallbackDisposition {
        match self.apply(notification).await {
            Ok(disposition) => disposition,
            Err(e) => {
                error!("Failed to apply provider callback: {e}");
                CallbackDisposition::Error(e.to_string())
            }
        }
    }

    async fn apply(&self, notification: ProviderNotification) -> Result<CallbackDisposition> {
        let Some(instruction) = self.find(&notification.identifiers).await? else {
            warn!(
                identifiers = ?notification.identifiers,
                result_code = %notification.result_code,
                "Discarding callback for unknown transfer"
            );
            return Ok(CallbackDisposition::Unmatched);
        };

        let resolution = Resolution::new(
            notification.result_code.outcome(),
            notification.result_code.to_string(),
            notification.provider_reference,
            ResolutionSource::Callback,
        )
        .with_description(notification.reason);

        let result = settle(
            self.ledger.as_ref(),
            self.notifier.as_ref(),
            &ResolveKey::Id(instruction.id),
            resolution,
        )
        .await?;

        Ok(if result.applied {
            CallbackDisposition::Resolved(result.instruction.state)
        } else if result.conflict.is_some() {
            CallbackDisposition::Conflict
        } else {
            CallbackDisposition::AlreadyResolved
        })
    }

    /// Provider handles and aliases first, then our own payout references.
    async fn find(&self, identifiers: &[String]) -> Result<Option<PayoutInstruction>> {
        let candidates = || identifiers.iter().filter(|id| !id.is_empty());
        for identifier in candidates() {
            if let Some(instruction) = self.ledger.find_by_handle(identifier).await? {
                return Ok(Some(instruction));
            }
        }
        for identifier in candidates() {
            // Only instructions the provider has accepted can be resolved.
            if let Some(instruction) = self.ledger.find_by_reference(identifier).await?
                && instruction.correlation_handle.is_some()
            {
                return Ok(Some(instruction));
            }
        }
        Ok(None)
    }
}
