#![allow(dead_code)]

use payout_recon::application::dispatcher::{DispatchConfig, Dispatcher, PayoutRequest};
use payout_recon::application::receiver::CallbackReceiver;
use payout_recon::application::retry::RetryPolicy;
use payout_recon::application::sweeper::{SweepConfig, Sweeper};
use payout_recon::domain::payout::Destination;
use payout_recon::infrastructure::in_memory::{InMemoryPayoutLedger, InMemoryReconciliationLog};
use payout_recon::infrastructure::mock::{MockProviderGateway, RecordingNotifier};
use payout_recon::interfaces::http::AppState;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{Error, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const BATCH_HEADER: &str =
    "reference,beneficiary_id,amount,destination,phone,account_number,bank_code";

pub fn mobile(reference: &str, phone: &str, amount: Decimal) -> PayoutRequest {
    PayoutRequest {
        reference: reference.to_string(),
        beneficiary_id: format!("E-{reference}"),
        amount,
        destination: Destination::MobileMoney {
            phone: phone.to_string(),
        },
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        timeout: Duration::from_millis(200),
        max_retries: 1,
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

/// In-memory ledger, scripted provider and recording notifier wired into every component.
pub struct Harness {
    pub ledger: InMemoryPayoutLedger,
    pub runs: InMemoryReconciliationLog,
    pub gateway: MockProviderGateway,
    pub notifier: RecordingNotifier,
    pub dispatcher: Dispatcher,
    pub receiver: CallbackReceiver,
    pub sweeper: Arc<Sweeper>,
}

impl Harness {
    pub fn new(grace_period: Duration, staleness_ceiling: Duration) -> Self {
        let ledger = InMemoryPayoutLedger::new();
        let runs = InMemoryReconciliationLog::new();
        let gateway = MockProviderGateway::new();
        let notifier = RecordingNotifier::new();

        let dispatcher = Dispatcher::new(
            Arc::new(ledger.clone()),
            Arc::new(gateway.clone()),
            Arc::new(notifier.clone()),
            DispatchConfig {
                concurrency: 4,
                retry: fast_retry(),
            },
        );
        let receiver = CallbackReceiver::new(Arc::new(ledger.clone()), Arc::new(notifier.clone()));
        let sweeper = Arc::new(Sweeper::new(
            Arc::new(ledger.clone()),
            Arc::new(runs.clone()),
            Arc::new(gateway.clone()),
            Arc::new(notifier.clone()),
            SweepConfig {
                grace_period,
                staleness_ceiling,
                interval: Duration::from_secs(60),
                concurrency: 4,
                retry: fast_retry(),
            },
        ));

        Self {
            ledger,
            runs,
            gateway,
            notifier,
            dispatcher,
            receiver,
            sweeper,
        }
    }

    /// Moves the components into shared HTTP state; the handles stay usable for assertions.
    pub fn into_app_state(
        self,
    ) -> (
        Arc<AppState>,
        InMemoryPayoutLedger,
        MockProviderGateway,
        RecordingNotifier,
    ) {
        let state = Arc::new(AppState {
            ledger: Arc::new(self.ledger.clone()),
            runs: Arc::new(self.runs),
            dispatcher: self.dispatcher,
            receiver: self.receiver,
            sweeper: self.sweeper,
        });
        (state, self.ledger, self.gateway, self.notifier)
    }
}

pub fn write_batch_csv(path: &Path, rows: &[&str]) -> Result<(), Error> {
    let mut file = File::create(path)?;
    writeln!(file, "{BATCH_HEADER}")?;
    for row in rows {
        writeln!(file, "{row}")?;
    }
    Ok(())
}
