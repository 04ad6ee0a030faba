use crate::domain::notification::Notification;
use crate::domain::ports::Notifier;
use crate::error::{PayoutError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

/// Writes notifications to the log. Used when no delivery webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        info!(
            beneficiary_id = %notification.beneficiary_id,
            reference = %notification.payout_reference,
            category = ?notification.category,
            outcome = ?notification.outcome,
            reason = notification.reason.as_deref().unwrap_or(""),
            "Payout notification"
        );
        Ok(())
    }
}

/// Posts each notification as JSON to the delivery service.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PayoutError::InternalError(Box::new(e)))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&notification)
            .send()
            .await
            .map_err(|e| PayoutError::InternalError(Box::new(e)))?;

        if !response.status().is_success() {
            return Err(PayoutError::InternalError(Box::new(std::io::Error::other(
                format!("Notifier responded with {}", response.status()),
            ))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notification::NotificationCategory;
    use crate::domain::payout::PayoutState;
    use httpmock::prelude::*;
    use serde_json::json;

    fn notification() -> Notification {
        Notification {
            beneficiary_id: "E1".to_string(),
            category: NotificationCategory::PayoutResolved,
            payout_reference: "R1".to_string(),
            outcome: Some(PayoutState::Success),
            reason: Some("0".to_string()),
        }
    }

    #[tokio::test]
    async fn test_http_notifier_posts_json() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/notify").json_body(json!({
                    "beneficiary_id": "E1",
                    "category": "payout_resolved",
                    "payout_reference": "R1",
                    "outcome": "SUCCESS",
                    "reason": "0"
                }));
                then.status(202);
            })
            .await;

        let notifier = HttpNotifier::new(server.url("/notify"), Duration::from_secs(5)).unwrap();
        notifier.notify(notification()).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_notifier_reports_delivery_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/notify");
                then.status(500);
            })
            .await;

        let notifier = HttpNotifier::new(server.url("/notify"), Duration::from_secs(5)).unwrap();
        assert!(notifier.notify(notification()).await.is_err());
    }
}
