//! Scriptable stand-ins for the provider and notifier collaborators.

use crate::domain::notification::{Notification, NotificationCategory};
use crate::domain::payout::CorrelationHandle;
use crate::domain::ports::{Notifier, ProviderGateway};
use crate::domain::provider::{ProviderAcceptance, ProviderError, ProviderStatus, SubmitRequest};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How the mock provider answers a submission for one reference.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitBehavior {
    Accept,
    Reject(String),
    /// Fails transiently `times` times, then accepts.
    FailTransiently { times: usize },
    /// Never answers within any sensible timeout.
    Hang,
}

#[derive(Default)]
struct MockState {
    behaviors: HashMap<String, SubmitBehavior>,
    transient_failures: HashMap<String, usize>,
    statuses: HashMap<String, ProviderStatus>,
    hanging_status: Vec<String>,
    submissions: Vec<String>,
    status_queries: Vec<String>,
}

/// In-process provider gateway.
///
/// Accepts every submission unless scripted otherwise. Handles are derived
/// from the reference (`AG_<reference>`, alias `OC_<reference>`) so tests can
/// address callbacks without reading the ledger. Unknown handles report
/// `StillPending`.
#[derive(Default, Clone)]
pub struct MockProviderGateway {
    state: Arc<Mutex<MockState>>,
}

impl MockProviderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_for(reference: &str) -> CorrelationHandle {
        CorrelationHandle::new(format!("AG_{reference}"))
    }

    pub fn alias_for(reference: &str) -> String {
        format!("OC_{reference}")
    }

    pub async fn on_submit(&self, reference: &str, behavior: SubmitBehavior) {
        let mut state = self.state.lock().await;
        state.behaviors.insert(reference.to_string(), behavior);
    }

    pub async fn set_status(&self, reference: &str, status: ProviderStatus) {
        let mut state = self.state.lock().await;
        state
            .statuses
            .insert(Self::handle_for(reference).to_string(), status);
    }

    /// Makes status queries for `reference` hang.
    pub async fn hang_status(&self, reference: &str) {
        let mut state = self.state.lock().await;
        state
            .hanging_status
            .push(Self::handle_for(reference).to_string());
    }

    /// References of every submission call, including failed ones.
    pub async fn submissions(&self) -> Vec<String> {
        self.state.lock().await.submissions.clone()
    }

    /// Handles of every status query.
    pub async fn status_queries(&self) -> Vec<String> {
        self.state.lock().await.status_queries.clone()
    }
}

#[async_trait]
impl ProviderGateway for MockProviderGateway {
    async fn submit(
        &self,
        request: &SubmitRequest,
    ) -> std::result::Result<ProviderAcceptance, ProviderError> {
        let behavior = {
            let mut state = self.state.lock().await;
            state.submissions.push(request.reference.clone());
            let behavior = state
                .behaviors
                .get(&request.reference)
                .cloned()
                .unwrap_or(SubmitBehavior::Accept);

            match behavior {
                SubmitBehavior::FailTransiently { times } => {
                    let failures = state
                        .transient_failures
                        .entry(request.reference.clone())
                        .or_default();
                    if *failures < times {
                        *failures += 1;
                        SubmitBehavior::FailTransiently { times }
                    } else {
                        SubmitBehavior::Accept
                    }
                }
                other => other,
            }
        };

        match behavior {
            SubmitBehavior::Accept => Ok(ProviderAcceptance {
                handle: Self::handle_for(&request.reference),
                aliases: vec![Self::alias_for(&request.reference)],
            }),
            SubmitBehavior::Reject(reason) => Err(ProviderError::Rejected(reason)),
            SubmitBehavior::FailTransiently { .. } => Err(ProviderError::Transient(
                "503 Service Unavailable".to_string(),
            )),
            SubmitBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Transient("hung".to_string()))
            }
        }
    }

    async fn query_status(
        &self,
        handle: &CorrelationHandle,
    ) -> std::result::Result<ProviderStatus, ProviderError> {
        let (status, hang) = {
            let mut state = self.state.lock().await;
            state.status_queries.push(handle.to_string());
            let hang = state.hanging_status.iter().any(|h| h == handle.as_str());
            let status = state
                .statuses
                .get(handle.as_str())
                .cloned()
                .unwrap_or(ProviderStatus::StillPending);
            (status, hang)
        };

        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(status)
    }
}

/// Notifier that keeps every notification in memory.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    pub async fn count(&self, reference: &str, category: NotificationCategory) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.payout_reference == reference && n.category == category)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.sent.lock().await.push(notification);
        Ok(())
    }
}
