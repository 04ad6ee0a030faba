use crate::domain::payout::{Amount, CorrelationHandle, Destination};
use crate::domain::ports::ProviderGateway;
use crate::domain::provider::{
    ProviderAcceptance, ProviderError, ProviderStatus, ResultCode, SubmitRequest,
};
use crate::error::{PayoutError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct SubmitBody<'a> {
    reference: &'a str,
    amount: Amount,
    currency: &'a str,
    destination: &'a Destination,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireStatus {
    Success,
    Failed,
    Pending,
}

#[derive(Deserialize)]
struct StatusBody {
    status: WireStatus,
    result_code: Option<ResultCode>,
    reason: Option<String>,
    provider_reference: Option<String>,
}

/// Provider gateway speaking the generic JSON payout API.
///
/// * `POST {base}/payouts` with the reference as idempotency key; a 2xx answer
///   carries `{ "handle", "aliases" }`, a 4xx answer is a definitive rejection.
/// * `GET {base}/payouts/{handle}` answers `{ "status": "success" | "failed" | "pending", ... }`.
///
/// 5xx answers and transport errors are transient.
#[derive(Debug, Clone)]
pub struct HttpProviderGateway {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    currency: String,
}

impl HttpProviderGateway {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        currency: String,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(&base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                PayoutError::ValidationError(format!("Invalid provider URL: {base_url:?}"))
            })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PayoutError::InternalError(Box::new(e)))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            currency,
        })
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, ProviderError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        if status.is_client_error() {
            Err(ProviderError::Rejected(format!("{status}: {message}")))
        } else {
            Err(ProviderError::Transient(format!("{status}: {message}")))
        }
    }
}

#[async_trait]
impl ProviderGateway for HttpProviderGateway {
    async fn submit(
        &self,
        request: &SubmitRequest,
    ) -> std::result::Result<ProviderAcceptance, ProviderError> {
        let body = SubmitBody {
            reference: &request.reference,
            amount: request.amount,
            currency: &self.currency,
            destination: &request.destination,
        };
        let response = self
            .send(
                self.client
                    .post(self.endpoint(&["payouts"]))
                    .json(&body),
            )
            .await?;

        response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("Malformed acceptance: {e}")))
    }

    async fn query_status(
        &self,
        handle: &CorrelationHandle,
    ) -> std::result::Result<ProviderStatus, ProviderError> {
        let response = self
            .send(
                self.client
                    .get(self.endpoint(&["payouts", handle.as_str()])),
            )
            .await
            .map_err(|e| match e {
                // A status query has no payload to reject; any refusal is retried next cycle.
                ProviderError::Rejected(message) => ProviderError::Transient(message),
                other => other,
            })?;

        let body: StatusBody = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("Malformed status: {e}")))?;

        let reason_code = body
            .result_code
            .map(|code| code.to_string())
            .or(body.reason)
            .unwrap_or_default();
        Ok(match body.status {
            WireStatus::Success => ProviderStatus::Success {
                reason_code,
                provider_reference: body.provider_reference,
            },
            WireStatus::Failed => ProviderStatus::Failed { reason_code },
            WireStatus::Pending => ProviderStatus::StillPending,
        })
    }
}
