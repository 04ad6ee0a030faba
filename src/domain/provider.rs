use crate::domain::payout::{Amount, CorrelationHandle, Destination, Outcome};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// What the provider needs to move money for one instruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitRequest {
    /// Sent to the provider as its idempotency key.
    pub reference: String,
    pub amount: Amount,
    pub destination: Destination,
}

/// Provider acceptance of a submission.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderAcceptance {
    pub handle: CorrelationHandle,
    /// Further identifiers the provider may use in callbacks for this transfer.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Answer of a status query.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderStatus {
    Success {
        reason_code: String,
        provider_reference: Option<String>,
    },
    Failed {
        reason_code: String,
    },
    StillPending,
}

impl ProviderStatus {
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            ProviderStatus::Success { .. } => Some(Outcome::Success),
            ProviderStatus::Failed { .. } => Some(Outcome::Failed),
            ProviderStatus::StillPending => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Definitive refusal, e.g. bad destination or insufficient float.
    #[error("rejected by provider: {0}")]
    Rejected(String),
    /// Timeouts, 5xx and transport failures.
    #[error("transient provider failure: {0}")]
    Transient(String),
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_) | ProviderError::Timeout(_))
    }
}

/// Provider result code, numeric or textual depending on the rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultCode {
    Number(i64),
    Text(String),
}

impl ResultCode {
    /// `0` and its textual equivalents mean success; any other code is a failure.
    pub fn outcome(&self) -> Outcome {
        let success = match self {
            ResultCode::Number(code) => *code == 0,
            ResultCode::Text(code) => {
                let code = code.trim();
                (!code.is_empty() && code.bytes().all(|b| b == b'0'))
                    || code.eq_ignore_ascii_case("success")
            }
        };
        if success {
            Outcome::Success
        } else {
            Outcome::Failed
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Number(code) => code.fmt(f),
            ResultCode::Text(code) => f.write_str(code.trim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_outcome() {
        assert_eq!(ResultCode::Number(0).outcome(), Outcome::Success);
        assert_eq!(ResultCode::Text("00".into()).outcome(), Outcome::Success);
        assert_eq!(ResultCode::Text("SUCCESS".into()).outcome(), Outcome::Success);
        assert_eq!(ResultCode::Number(2001).outcome(), Outcome::Failed);
        assert_eq!(ResultCode::Text("".into()).outcome(), Outcome::Failed);
        assert_eq!(ResultCode::Text("E05".into()).outcome(), Outcome::Failed);
    }

    #[test]
    fn test_result_code_deserializes_numbers_and_strings() {
        let number: ResultCode = serde_json::from_str("0").unwrap();
        assert_eq!(number, ResultCode::Number(0));
        let text: ResultCode = serde_json::from_str("\"17\"").unwrap();
        assert_eq!(text, ResultCode::Text("17".to_string()));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Transient("503".into()).is_transient());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!ProviderError::Rejected("bad msisdn".into()).is_transient());
    }
}
