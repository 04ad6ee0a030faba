mod common;

use common::{Harness, mobile};
use payout_recon::application::dispatcher::DispatchReport;
use payout_recon::domain::notification::NotificationCategory;
use payout_recon::domain::payout::{PayoutInstruction, PayoutState};
use payout_recon::domain::ports::PayoutLedger;
use payout_recon::domain::provider::ProviderStatus;
use payout_recon::domain::reconciliation::ReconciliationRun;
use payout_recon::infrastructure::in_memory::InMemoryPayoutLedger;
use payout_recon::infrastructure::mock::{MockProviderGateway, RecordingNotifier, SubmitBehavior};
use payout_recon::interfaces::http;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::oneshot;

struct Server {
    base: String,
    ledger: InMemoryPayoutLedger,
    gateway: MockProviderGateway,
    notifier: RecordingNotifier,
    client: reqwest::Client,
    _shutdown: oneshot::Sender<()>,
}

async fn start(grace_period: Duration) -> Server {
    let harness = Harness::new(grace_period, Duration::from_secs(86_400));
    let (state, ledger, gateway, notifier) = harness.into_app_state();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        http::serve(listener, state, async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });

    Server {
        base: format!("http://{addr}"),
        ledger,
        gateway,
        notifier,
        client: reqwest::Client::new(),
        _shutdown: tx,
    }
}

fn accepted_ack() -> Value {
    json!({"ResultCode": 0, "ResultDesc": "Accepted"})
}

impl Server {
    async fn post(&self, path: &str, body: impl Into<reqwest::Body>) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap()
    }

    async fn dispatch_r1(&self) {
        let batch = json!([mobile("R1", "254712345678", dec!(5000))]).to_string();
        let reports: Vec<DispatchReport> =
            self.post("/payouts/batch", batch).await.json().await.unwrap();
        assert!(reports[0].is_accepted());
    }
}

#[tokio::test]
async fn test_health() {
    let server = start(Duration::from_secs(900)).await;
    let body: Value = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_batch_dispatch_reports_per_item() {
    let server = start(Duration::from_secs(900)).await;
    server
        .gateway
        .on_submit("R2", SubmitBehavior::Reject("invalid phone number".into()))
        .await;

    let batch = json!([
        {"reference": "R1", "beneficiaryId": "E1", "amount": "5000",
         "destination": {"type": "mobile_money", "phone": "254712345678"}},
        {"reference": "R2", "beneficiary_id": "E2", "amount": "10",
         "destination": {"type": "mobile_money", "phone": "254700000000"}},
        {"reference": "R3", "beneficiary_id": "E3", "amount": "-1",
         "destination": {"type": "bank_account", "account_number": "0123456789", "bank_code": "01"}}
    ]);
    let response = server.post("/payouts/batch", batch.to_string()).await;
    assert_eq!(response.status(), 200);
    let reports: Vec<Value> = response.json().await.unwrap();

    let outcomes: Vec<_> = reports.iter().map(|r| r["outcome"].clone()).collect();
    assert_eq!(
        outcomes,
        vec![json!("accepted"), json!("rejected"), json!("rejected")]
    );
    assert_eq!(reports[0]["state"], json!("DISPATCHED"));
    assert_eq!(reports[1]["state"], json!("CREATED"));
    assert_eq!(reports[2]["state"], Value::Null);
}

#[tokio::test]
async fn test_malformed_batch_items_are_rejected_individually() {
    let server = start(Duration::from_secs(900)).await;

    let batch = json!([
        {"reference": "R1", "beneficiary_id": "E1", "amount": "5000",
         "destination": {"type": "mobile_money", "phone": "254712345678"}},
        {"reference": "R2", "beneficiary_id": "E2", "amount": "5000",
         "destination": {"type": "mobile_money"}},
        {"reference": "R3", "beneficiaryId": "E3", "amount": "abc",
         "destination": {"type": "mobile_money", "phone": "254712345679"}},
        {"reference": "R4", "beneficiary_id": "E4", "amount": "10",
         "destination": {"type": "carrier_pigeon"}}
    ]);
    let response = server.post("/payouts/batch", batch.to_string()).await;
    assert_eq!(response.status(), 200);
    let reports: Vec<DispatchReport> = response.json().await.unwrap();

    let references: Vec<_> = reports.iter().map(|r| r.reference.as_str()).collect();
    assert_eq!(references, vec!["R1", "R2", "R3", "R4"]);
    assert!(reports[0].is_accepted());
    for report in &reports[1..] {
        assert!(!report.is_accepted());
        assert_eq!(report.state, None);
        assert!(report.reason.is_some());
    }

    for reference in ["R2", "R3", "R4"] {
        assert_eq!(
            server
                .notifier
                .count(reference, NotificationCategory::DispatchFailed)
                .await,
            1,
            "{reference}"
        );
        assert!(
            server
                .ledger
                .find_by_reference(reference)
                .await
                .unwrap()
                .is_none()
        );
    }
    let sent = server.notifier.sent().await;
    let r3 = sent.iter().find(|n| n.payout_reference == "R3").unwrap();
    assert_eq!(r3.beneficiary_id, "E3");
}

#[tokio::test]
async fn test_bank_callback_matched_by_payout_reference() {
    let server = start(Duration::from_secs(900)).await;
    server.dispatch_r1().await;

    let body = r#"{"transfer_id": "TRF-unknown", "reference": "R1", "status_code": "05", "message": "Account closed"}"#;
    let response = server.post("/callbacks/bank-transfer", body).await;
    assert_eq!(response.json::<Value>().await.unwrap(), accepted_ack());

    let stored = server.ledger.find_by_reference("R1").await.unwrap().unwrap();
    assert_eq!(stored.state, PayoutState::Failed);
    assert_eq!(stored.resolution.unwrap().reason_code, "05");
}

#[tokio::test]
async fn test_conflicting_callback_is_kept_on_the_payout() {
    let server = start(Duration::from_secs(900)).await;
    server.dispatch_r1().await;

    for code in [0, 2001] {
        let body = json!({"handle": "AG_R1", "result_code": code});
        server.post("/callbacks/generic", body.to_string()).await;
    }

    let payout: Value = server
        .client
        .get(format!("{}/payouts/R1", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(payout["state"], json!("SUCCESS"));
    let conflicts = payout["conflicts"].as_array().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0]["recorded"], json!("SUCCESS"));
    assert_eq!(conflicts[0]["reported"], json!("FAILED"));
    assert_eq!(conflicts[0]["source"], json!("callback"));
}

#[tokio::test]
async fn test_callback_resolves_and_always_acks() {
    let server = start(Duration::from_secs(900)).await;
    server.dispatch_r1().await;

    let result = json!({"Result": {
        "ResultType": 0,
        "ResultCode": 0,
        "ResultDesc": "The service request is processed successfully.",
        "OriginatorConversationID": "OC_R1",
        "ConversationID": "AG_R1",
        "TransactionID": "NLJ41HAY6Q"
    }});
    for _ in 0..2 {
        let response = server
            .post("/callbacks/mobile-money/result", result.to_string())
            .await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.json::<Value>().await.unwrap(), accepted_ack());
    }

    let stored = server.ledger.find_by_reference("R1").await.unwrap().unwrap();
    assert_eq!(stored.state, PayoutState::Success);
    assert_eq!(
        stored.resolution.unwrap().provider_reference.as_deref(),
        Some("NLJ41HAY6Q")
    );
    assert_eq!(
        server
            .notifier
            .count("R1", NotificationCategory::PayoutResolved)
            .await,
        1
    );

    for (path, body) in [
        ("/callbacks/generic", "{not json"),
        (
            "/callbacks/bank-transfer",
            r#"{"transfer_id": "unknown", "status_code": 0}"#,
        ),
        (
            "/callbacks/mobile-money/timeout",
            r#"{"Result": {"ConversationID": "AG_R1"}}"#,
        ),
    ] {
        let response = server.post(path, body).await;
        assert_eq!(response.status(), 200, "{path}");
        assert_eq!(response.json::<Value>().await.unwrap(), accepted_ack());
    }
}

#[tokio::test]
async fn test_payout_lookup_and_redispatch() {
    let server = start(Duration::from_secs(900)).await;
    server
        .gateway
        .on_submit("R1", SubmitBehavior::Reject("insufficient float".into()))
        .await;
    let batch = json!([mobile("R1", "254712345678", dec!(5000))]).to_string();
    server.post("/payouts/batch", batch).await;

    let created: PayoutInstruction = server
        .client
        .get(format!("{}/payouts/R1", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created.state, PayoutState::Created);
    assert_eq!(
        created.last_error.as_deref(),
        Some("rejected by provider: insufficient float")
    );

    server.gateway.on_submit("R1", SubmitBehavior::Accept).await;
    let report: DispatchReport = server
        .post("/payouts/R1/dispatch", "")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(report.state, Some(PayoutState::Dispatched));

    let missing = server
        .client
        .get(format!("{}/payouts/nope", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    assert_eq!(server.post("/payouts/nope/dispatch", "").await.status(), 404);
}

#[tokio::test]
async fn test_manual_reconciliation_run() {
    let server = start(Duration::ZERO).await;
    server.dispatch_r1().await;
    server
        .gateway
        .set_status(
            "R1",
            ProviderStatus::Failed {
                reason_code: "2001".to_string(),
            },
        )
        .await;

    let run: ReconciliationRun = server
        .post("/reconciliation/runs", "")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(run.resolved_failed, 1);

    let runs: Vec<ReconciliationRun> = server
        .client
        .get(format!("{}/reconciliation/runs?limit=5", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(runs, vec![run]);
    let stored = server.ledger.find_by_reference("R1").await.unwrap().unwrap();
    assert_eq!(stored.state, PayoutState::Failed);
}
