use crate::application::resolution::{notify, settle};
use crate::application::retry::RetryPolicy;
use crate::domain::notification::NotificationCategory;
use crate::domain::payout::{
    Outcome, PayoutInstruction, Resolution, ResolutionSource, ResolveKey, cutoff,
};
use crate::domain::ports::{SharedGateway, SharedLedger, SharedNotifier, SharedReconciliationLog};
use crate::domain::provider::ProviderStatus;
use crate::domain::reconciliation::{ReconciliationRun, ResolutionConflict, RunTrigger};
use crate::error::Result;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepConfig {
    /// Instructions updated more recently than this are left to their callback.
    pub grace_period: Duration,
    /// Dispatched this long without resolution raises a stale alert.
    pub staleness_ceiling: Duration,
    pub interval: Duration,
    /// Maximum number of status queries in flight per sweep.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(15 * 60),
            staleness_ceiling: Duration::from_secs(24 * 60 * 60),
            interval: Duration::from_secs(5 * 60),
            concurrency: 8,
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-instruction result of one sweep.
enum Examined {
    Resolved(Outcome),
    AlreadyResolved,
    Conflict(ResolutionConflict),
    Pending { stale_alert: bool },
}

/// Polls the provider for dispatched instructions whose callback never arrived.
pub struct Sweeper {
    ledger: SharedLedger,
    runs: SharedReconciliationLog,
    gateway: SharedGateway,
    notifier: SharedNotifier,
    config: SweepConfig,
}

impl Sweeper {
    pub fn new(
        ledger: SharedLedger,
        runs: SharedReconciliationLog,
        gateway: SharedGateway,
        notifier: SharedNotifier,
        config: SweepConfig,
    ) -> Self {
        Self {
            ledger,
            runs,
            gateway,
            notifier,
            config,
        }
    }

    /// Runs one sweep over every eligible instruction and records it.
    pub async fn sweep(&self, trigger: RunTrigger) -> Result<ReconciliationRun> {
        let mut run = ReconciliationRun::start(
            trigger,
            cutoff(self.config.grace_period, Utc::now()),
        );
        let unresolved = self.ledger.list_unresolved(self.config.grace_period).await?;
        debug!(eligible = unresolved.len(), ?trigger, "Starting reconciliation sweep");

        run.examined = unresolved.iter().map(|i| i.reference.clone()).collect();
        let results: Vec<Result<Examined>> = stream::iter(unresolved)
            .map(|instruction| self.examine(instruction))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                Ok(Examined::Resolved(Outcome::Success)) => run.resolved_success += 1,
                Ok(Examined::Resolved(Outcome::Failed)) => run.resolved_failed += 1,
                Ok(Examined::AlreadyResolved) => {}
                Ok(Examined::Conflict(conflict)) => run.conflicts.push(conflict),
                Ok(Examined::Pending { stale_alert }) => {
                    run.still_pending += 1;
                    if stale_alert {
                        run.stale_alerts += 1;
                    }
                }
                Err(e) => {
                    error!("Failed to reconcile payout: {e}");
                    run.still_pending += 1;
                }
            }
        }

        let run = run.finish();
        self.runs.record(run.clone()).await?;
        info!(
            run_id = %run.id,
            examined = run.examined.len(),
            resolved_success = run.resolved_success,
            resolved_failed = run.resolved_failed,
            still_pending = run.still_pending,
            stale_alerts = run.stale_alerts,
            conflicts = run.conflicts.len(),
            "Reconciliation sweep finished"
        );
        Ok(run)
    }

    async fn examine(&self, instruction: PayoutInstruction) -> Result<Examined> {
        let Some(handle) = instruction.correlation_handle.clone() else {
            warn!(reference = %instruction.reference, "Dispatched payout has no handle");
            return self.pending(&instruction).await;
        };

        let status = match self
            .config
            .retry
            .call(|| self.gateway.query_status(&handle))
            .await
        {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    reference = %instruction.reference,
                    %handle,
                    "Status query failed, treating as pending: {e}"
                );
                ProviderStatus::StillPending
            }
        };

        let resolution = match status {
            ProviderStatus::Success {
                reason_code,
                provider_reference,
            } => Resolution::new(
                Outcome::Success,
                reason_code,
                provider_reference,
                ResolutionSource::Sweep,
            ),
            ProviderStatus::Failed { reason_code } => {
                Resolution::new(Outcome::Failed, reason_code, None, ResolutionSource::Sweep)
            }
            ProviderStatus::StillPending => return self.pending(&instruction).await,
        };

        let outcome = resolution.outcome;
        let result = settle(
            self.ledger.as_ref(),
            self.notifier.as_ref(),
            &ResolveKey::Id(instruction.id),
            resolution,
        )
        .await?;

        Ok(match result.conflict {
            Some(conflict) => Examined::Conflict(conflict),
            None if result.applied => Examined::Resolved(outcome),
            None => Examined::AlreadyResolved,
        })
    }

    async fn pending(&self, instruction: &PayoutInstruction) -> Result<Examined> {
        if !instruction.is_stale(self.config.staleness_ceiling, Utc::now()) {
            return Ok(Examined::Pending { stale_alert: false });
        }

        let raised = self.ledger.mark_stale_alerted(instruction.id).await?;
        if raised {
            warn!(
                reference = %instruction.reference,
                dispatched_at = ?instruction.dispatched_at,
                "Payout pending past the staleness ceiling"
            );
            notify(
                self.notifier.as_ref(),
                instruction,
                NotificationCategory::StalePayout,
                Some(format!(
                    "No final status after {:?}",
                    self.config.staleness_ceiling
                )),
            )
            .await;
        }
        Ok(Examined::Pending { stale_alert: raised })
    }

    /// Sweeps on every interval tick until `shutdown` turns true.
    ///
    /// A sweep in progress when shutdown is signalled is dropped; every ledger
    /// write it already made is a complete transition.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.config.interval, "Reconciliation sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        result = self.sweep(RunTrigger::Scheduled) => {
                            if let Err(e) = result {
                                error!("Reconciliation sweep failed: {e}");
                            }
                        }
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("Reconciliation sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payout::{CorrelationHandle, Destination, NewPayout, PayoutState};
    use crate::domain::ports::{PayoutLedger, ReconciliationLog};
    use crate::infrastructure::in_memory::{InMemoryPayoutLedger, InMemoryReconciliationLog};
    use crate::infrastructure::mock::{MockProviderGateway, RecordingNotifier};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        ledger: InMemoryPayoutLedger,
        runs: InMemoryReconciliationLog,
        gateway: MockProviderGateway,
        notifier: RecordingNotifier,
        sweeper: Sweeper,
    }

    fn fixture(grace_period: Duration, staleness_ceiling: Duration) -> Fixture {
        let ledger = InMemoryPayoutLedger::new();
        let runs = InMemoryReconciliationLog::new();
        let gateway = MockProviderGateway::new();
        let notifier = RecordingNotifier::new();
        let config = SweepConfig {
            grace_period,
            staleness_ceiling,
            interval: Duration::from_millis(20),
            concurrency: 4,
            retry: RetryPolicy {
                timeout: Duration::from_millis(100),
                max_retries: 1,
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        };
        let sweeper = Sweeper::new(
            Arc::new(ledger.clone()),
            Arc::new(runs.clone()),
            Arc::new(gateway.clone()),
            Arc::new(notifier.clone()),
            config,
        );
        Fixture {
            ledger,
            runs,
            gateway,
            notifier,
            sweeper,
        }
    }

    async fn dispatched(ledger: &InMemoryPayoutLedger, reference: &str) -> PayoutInstruction {
        let payout = NewPayout::new(
            reference,
            "E1",
            dec!(5000),
            Destination::MobileMoney {
                phone: "254712345678".to_string(),
            },
        )
        .unwrap();
        let id = ledger.create(payout).await.unwrap().instruction().id;
        ledger
            .mark_dispatched(id, MockProviderGateway::handle_for(reference), vec![])
            .await
            .unwrap()
    }

    fn success() -> ProviderStatus {
        ProviderStatus::Success {
            reason_code: "0".to_string(),
            provider_reference: Some("TX1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_sweep_resolves_from_provider_status() {
        let f = fixture(Duration::ZERO, Duration::from_secs(3600));
        dispatched(&f.ledger, "R1").await;
        dispatched(&f.ledger, "R2").await;
        f.gateway.set_status("R1", success()).await;
        f.gateway
            .set_status(
                "R2",
                ProviderStatus::Failed {
                    reason_code: "2001".to_string(),
                },
            )
            .await;

        let run = f.sweeper.sweep(RunTrigger::Manual).await.unwrap();

        assert_eq!(run.resolved_success, 1);
        assert_eq!(run.resolved_failed, 1);
        assert_eq!(run.still_pending, 0);
        let r1 = f.ledger.find_by_reference("R1").await.unwrap().unwrap();
        assert_eq!(r1.state, PayoutState::Success);
        assert_eq!(r1.resolution.unwrap().source, ResolutionSource::Sweep);
        let r2 = f.ledger.find_by_reference("R2").await.unwrap().unwrap();
        assert_eq!(r2.state, PayoutState::Failed);

        assert_eq!(
            f.notifier
                .count("R1", NotificationCategory::PayoutResolved)
                .await,
            1
        );
        assert_eq!(f.runs.recent(10).await.unwrap(), vec![run]);
    }

    #[tokio::test]
    async fn test_recently_updated_instructions_are_skipped() {
        let f = fixture(Duration::from_secs(3600), Duration::from_secs(7200));
        dispatched(&f.ledger, "R1").await;
        f.gateway.set_status("R1", success()).await;

        let run = f.sweeper.sweep(RunTrigger::Manual).await.unwrap();

        assert!(run.examined.is_empty());
        assert!(f.gateway.status_queries().await.is_empty());
        let r1 = f.ledger.find_by_reference("R1").await.unwrap().unwrap();
        assert_eq!(r1.state, PayoutState::Dispatched);
    }

    #[tokio::test]
    async fn test_pending_and_unanswered_queries_leave_instruction_untouched() {
        let f = fixture(Duration::ZERO, Duration::from_secs(3600));
        let r1 = dispatched(&f.ledger, "R1").await;
        dispatched(&f.ledger, "R2").await;
        f.gateway.hang_status("R2").await;

        let run = f.sweeper.sweep(RunTrigger::Manual).await.unwrap();

        assert_eq!(run.still_pending, 2);
        assert_eq!(run.stale_alerts, 0);
        assert_eq!(f.ledger.get(r1.id).await.unwrap().unwrap(), r1);
        let r2 = f.ledger.find_by_reference("R2").await.unwrap().unwrap();
        assert_eq!(r2.state, PayoutState::Dispatched);
        assert!(f.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_alert_is_raised_once() {
        let f = fixture(Duration::ZERO, Duration::from_millis(20));
        dispatched(&f.ledger, "R1").await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let first = f.sweeper.sweep(RunTrigger::Manual).await.unwrap();
        let second = f.sweeper.sweep(RunTrigger::Manual).await.unwrap();

        assert_eq!(first.stale_alerts, 1);
        assert_eq!(second.stale_alerts, 0);
        assert_eq!(
            f.notifier
                .count("R1", NotificationCategory::StalePayout)
                .await,
            1
        );
        let r1 = f.ledger.find_by_reference("R1").await.unwrap().unwrap();
        assert_eq!(r1.state, PayoutState::Dispatched);
        assert!(r1.stale_alerted_at.is_some());
    }

    #[tokio::test]
    async fn test_conflicting_status_is_recorded_not_applied() {
        let f = fixture(Duration::ZERO, Duration::from_secs(3600));
        let r1 = dispatched(&f.ledger, "R1").await;
        f.gateway.set_status("R1", success()).await;
        // Ask with a stale snapshot: the ledger already holds FAILED.
        f.ledger
            .resolve(
                &ResolveKey::Handle(CorrelationHandle::new("AG_R1")),
                Resolution::new(Outcome::Failed, "1", None, ResolutionSource::Callback),
            )
            .await
            .unwrap();
        let outcome = f.sweeper.examine(r1).await.unwrap();

        let Examined::Conflict(conflict) = outcome else {
            panic!("expected a conflict");
        };
        assert_eq!(conflict.recorded, Outcome::Failed);
        assert_eq!(conflict.reported, Outcome::Success);
        let stored = f.ledger.find_by_reference("R1").await.unwrap().unwrap();
        assert_eq!(stored.state, PayoutState::Failed);
    }

    #[tokio::test]
    async fn test_scheduled_loop_stops_on_shutdown() {
        let f = fixture(Duration::ZERO, Duration::from_secs(3600));
        let (tx, rx) = watch::channel(false);

        let sweeper = f.sweeper;
        let handle = tokio::spawn(async move { sweeper.run(rx).await });
        tokio::time::sleep(Duration::from_millis(70)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
        assert!(!f.runs.recent(10).await.unwrap().is_empty());
    }
}
