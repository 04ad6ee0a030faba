//! HTTP API: batch dispatch, provider callbacks and reconciliation triggers.

pub mod callbacks;

use crate::application::dispatcher::{
    BatchItem, DispatchReport, Dispatcher, InvalidItem, PayoutRequest,
};
use crate::application::receiver::{CallbackReceiver, ProviderNotification};
use crate::application::sweeper::Sweeper;
use crate::domain::payout::PayoutInstruction;
use crate::domain::ports::{SharedLedger, SharedReconciliationLog};
use crate::domain::reconciliation::{ReconciliationRun, RunTrigger};
use crate::error::PayoutError;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use callbacks::{BankTransferCallback, GenericCallback, MobileMoneyCallback};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

const DEFAULT_RUN_LIMIT: usize = 20;

pub struct AppState {
    pub ledger: SharedLedger,
    pub runs: SharedReconciliationLog,
    pub dispatcher: Dispatcher,
    pub receiver: CallbackReceiver,
    pub sweeper: Arc<Sweeper>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Fixed answer to every provider callback.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    fn accepted() -> Json<Self> {
        Json(Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    limit: Option<usize>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/payouts/batch", post(dispatch_handler))
        .route("/payouts/{reference}", get(payout_handler))
        .route("/payouts/{reference}/dispatch", post(redispatch_handler))
        .route(
            "/callbacks/mobile-money/result",
            post(mobile_money_result_handler),
        )
        .route(
            "/callbacks/mobile-money/timeout",
            post(mobile_money_timeout_handler),
        )
        .route("/callbacks/bank-transfer", post(bank_transfer_handler))
        .route("/callbacks/generic", post(generic_callback_handler))
        .route(
            "/reconciliation/runs",
            get(list_runs_handler).post(trigger_run_handler),
        )
        .with_state(state)
}

/// Serves the API on `listener` until `shutdown` completes.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP API listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

fn api_error(e: PayoutError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        PayoutError::NotFound(_) => StatusCode::NOT_FOUND,
        PayoutError::ValidationError(_) | PayoutError::InvalidTransition { .. } => {
            StatusCode::BAD_REQUEST
        }
        _ => {
            error!("Request failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn dispatch_handler(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<Vec<Value>>,
) -> Json<Vec<DispatchReport>> {
    let batch = batch.into_iter().map(batch_item).collect();
    Json(state.dispatcher.dispatch_items(batch).await)
}

/// Decodes one batch element on its own so a bad item cannot fail its siblings.
fn batch_item(value: Value) -> BatchItem {
    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string()
    };
    let reference = text(&["reference"]);
    let beneficiary_id = text(&["beneficiary_id", "beneficiaryId"]);

    match serde_json::from_value::<PayoutRequest>(value) {
        Ok(request) => BatchItem::Request(request),
        Err(e) => BatchItem::Invalid(InvalidItem {
            reference,
            beneficiary_id,
            reason: format!("Invalid payout item: {e}"),
        }),
    }
}

async fn payout_handler(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> ApiResult<PayoutInstruction> {
    match state.ledger.find_by_reference(&reference).await {
        Ok(Some(instruction)) => Ok(Json(instruction)),
        Ok(None) => Err(api_error(PayoutError::NotFound(reference))),
        Err(e) => Err(api_error(e)),
    }
}

async fn redispatch_handler(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> ApiResult<DispatchReport> {
    state
        .dispatcher
        .redispatch(&reference)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn trigger_run_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<ReconciliationRun> {
    state
        .sweeper
        .sweep(RunTrigger::Manual)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn list_runs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Vec<ReconciliationRun>> {
    state
        .runs
        .recent(query.limit.unwrap_or(DEFAULT_RUN_LIMIT))
        .await
        .map(Json)
        .map_err(api_error)
}

fn parse<T: DeserializeOwned>(shape: &str, body: &Bytes) -> Option<T> {
    match serde_json::from_slice(body) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(shape, "Discarding malformed callback: {e}");
            None
        }
    }
}

async fn receive(
    state: &AppState,
    notification: Option<ProviderNotification>,
) -> Json<CallbackAck> {
    if let Some(notification) = notification {
        state.receiver.receive(notification).await;
    }
    CallbackAck::accepted()
}

async fn mobile_money_result_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<CallbackAck> {
    let notification =
        parse::<MobileMoneyCallback>("mobile-money result", &body).and_then(|callback| {
            let notification = callback.into_notification();
            if notification.is_none() {
                warn!("Mobile money result without a result code");
            }
            notification
        });
    receive(&state, notification).await
}

async fn mobile_money_timeout_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<CallbackAck> {
    let notification =
        parse::<MobileMoneyCallback>("mobile-money timeout", &body).and_then(|callback| {
            let notification = callback.into_notification();
            if notification.is_none() {
                info!("Queue timeout without a result code, leaving payout to reconciliation");
            }
            notification
        });
    receive(&state, notification).await
}

async fn bank_transfer_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<CallbackAck> {
    let notification = parse::<BankTransferCallback>("bank transfer", &body).map(Into::into);
    receive(&state, notification).await
}

async fn generic_callback_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<CallbackAck> {
    let notification = parse::<GenericCallback>("generic", &body).map(Into::into);
    receive(&state, notification).await
}
