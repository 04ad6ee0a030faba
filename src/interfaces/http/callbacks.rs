//! Per-provider callback payloads, normalized into [`ProviderNotification`].

use crate::application::receiver::ProviderNotification;
use crate::domain::provider::ResultCode;
use serde::Deserialize;

/// Envelope of the mobile-money B2C result and queue-timeout callbacks.
#[derive(Debug, Deserialize)]
pub struct MobileMoneyCallback {
    #[serde(rename = "Result")]
    result: MobileMoneyResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MobileMoneyResult {
    #[serde(rename = "ConversationID", default)]
    conversation_id: Option<String>,
    #[serde(rename = "OriginatorConversationID", default)]
    originator_conversation_id: Option<String>,
    #[serde(rename = "TransactionID", default)]
    transaction_id: Option<String>,
    #[serde(default)]
    result_code: Option<ResultCode>,
    #[serde(default)]
    result_desc: Option<String>,
}

impl MobileMoneyCallback {
    /// `None` when the payload carries no result code, as some queue timeouts do.
    pub fn into_notification(self) -> Option<ProviderNotification> {
        let result = self.result;
        let result_code = result.result_code?;
        let identifiers = [result.conversation_id, result.originator_conversation_id]
            .into_iter()
            .flatten()
            .collect();
        Some(ProviderNotification {
            identifiers,
            result_code,
            reason: result.result_desc,
            provider_reference: result.transaction_id.filter(|id| !id.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct BankTransferCallback {
    transfer_id: String,
    #[serde(default)]
    reference: Option<String>,
    status_code: ResultCode,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    transaction_ref: Option<String>,
}

impl From<BankTransferCallback> for ProviderNotification {
    fn from(callback: BankTransferCallback) -> Self {
        let identifiers = std::iter::once(callback.transfer_id)
            .chain(callback.reference)
            .collect();
        ProviderNotification {
            identifiers,
            result_code: callback.status_code,
            reason: callback.message,
            provider_reference: callback.transaction_ref,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenericCallback {
    handle: String,
    result_code: ResultCode,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    provider_reference: Option<String>,
}

impl From<GenericCallback> for ProviderNotification {
    fn from(callback: GenericCallback) -> Self {
        ProviderNotification {
            identifiers: vec![callback.handle],
            result_code: callback.result_code,
            reason: callback.reason,
            provider_reference: callback.provider_reference,
        }
    }
}
