use crate::domain::notification::{Notification, NotificationCategory};
use crate::domain::payout::{PayoutInstruction, Resolution, ResolveKey, ResolveResult};
use crate::domain::ports::{Notifier, PayoutLedger};
use crate::error::Result;
use tracing::{debug, info, warn};

/// The single resolution path shared by callbacks and sweeps.
///
/// Applies the resolution through the ledger's compare-and-set and emits one
/// `PayoutResolved` notification when, and only when, this call performed the
/// transition.
pub(crate) async fn settle(
    ledger: &dyn PayoutLedger,
    notifier: &dyn Notifier,
    key: &ResolveKey,
    resolution: Resolution,
) -> Result<ResolveResult> {
    let source = resolution.source;
    let result = ledger.resolve(key, resolution).await?;
    let instruction = &result.instruction;

    if result.applied {
        info!(
            reference = %instruction.reference,
            state = %instruction.state,
            %source,
            "Payout resolved"
        );
        let reason = instruction
            .resolution
            .as_ref()
            .map(|resolution| resolution.reason_code.clone());
        notify(
            notifier,
            instruction,
            NotificationCategory::PayoutResolved,
            reason,
        )
        .await;
    } else if let Some(conflict) = &result.conflict {
        warn!(
            reference = %conflict.reference,
            recorded = %conflict.recorded,
            reported = %conflict.reported,
            %source,
            "Conflicting resolution rejected"
        );
    } else {
        debug!(
            reference = %instruction.reference,
            state = %instruction.state,
            %source,
            "Payout already resolved"
        );
    }

    Ok(result)
}

/// Delivers a notification about a ledger instruction; failures are logged only.
pub(crate) async fn notify(
    notifier: &dyn Notifier,
    instruction: &PayoutInstruction,
    category: NotificationCategory,
    reason: Option<String>,
) {
    deliver(
        notifier,
        Notification {
            beneficiary_id: instruction.beneficiary_id.clone(),
            category,
            payout_reference: instruction.reference.clone(),
            outcome: Some(instruction.state),
            reason,
        },
    )
    .await;
}

pub(crate) async fn deliver(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier.notify(notification.clone()).await {
        warn!(
            reference = %notification.payout_reference,
            category = ?notification.category,
            "Notification delivery failed: {e}"
        );
    }
}

