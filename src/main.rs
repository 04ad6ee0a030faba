use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payout_recon::application::dispatcher::Dispatcher;
use payout_recon::application::receiver::CallbackReceiver;
use payout_recon::application::sweeper::Sweeper;
use payout_recon::config::{Cli, Command, Config};
use payout_recon::domain::ports::{
    SharedGateway, SharedLedger, SharedNotifier, SharedReconciliationLog,
};
use payout_recon::domain::reconciliation::RunTrigger;
use payout_recon::infrastructure::http_provider::HttpProviderGateway;
use payout_recon::infrastructure::in_memory::{InMemoryPayoutLedger, InMemoryReconciliationLog};
use payout_recon::infrastructure::mock::MockProviderGateway;
use payout_recon::infrastructure::notifier::{HttpNotifier, LogNotifier};
use payout_recon::interfaces::csv::batch_reader::BatchReader;
use payout_recon::interfaces::csv::report_writer::ReportWriter;
use payout_recon::interfaces::http::{self, AppState};
use payout_recon::telemetry::setup_tracing;
use std::fs::File;
use std::io;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.config.log_level);
    cli.config.validate().into_diagnostic()?;

    let (ledger, runs) = open_storage(&cli.config)?;
    let gateway = provider(&cli.config)?;
    let notifier = notifier(&cli.config)?;

    match cli.command {
        Command::Dispatch { input } => {
            let dispatcher = Dispatcher::new(
                ledger,
                gateway,
                notifier,
                cli.config.dispatch_config(),
            );

            let file = File::open(input).into_diagnostic()?;
            let batch = BatchReader::new(file).items().into_diagnostic()?.collect();

            let reports = dispatcher.dispatch_items(batch).await;
            let stdout = io::stdout();
            let mut writer = ReportWriter::new(stdout.lock());
            writer.write_reports(&reports).into_diagnostic()?;
        }
        Command::Reconcile => {
            let sweeper = Sweeper::new(ledger, runs, gateway, notifier, cli.config.sweep_config());
            let run = sweeper.sweep(RunTrigger::Manual).await.into_diagnostic()?;
            println!("{}", serde_json::to_string_pretty(&run).into_diagnostic()?);
        }
        Command::Serve => {
            let sweeper = Arc::new(Sweeper::new(
                ledger.clone(),
                runs.clone(),
                gateway.clone(),
                notifier.clone(),
                cli.config.sweep_config(),
            ));
            let state = Arc::new(AppState {
                ledger: ledger.clone(),
                runs,
                dispatcher: Dispatcher::new(
                    ledger.clone(),
                    gateway,
                    notifier.clone(),
                    cli.config.dispatch_config(),
                ),
                receiver: CallbackReceiver::new(ledger, notifier),
                sweeper: sweeper.clone(),
            });

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let scheduled = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

            let listener = tokio::net::TcpListener::bind(cli.config.listen_addr)
                .await
                .into_diagnostic()?;
            http::serve(listener, state, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for shutdown signal: {e}");
                }
                info!("Shutdown requested");
            })
            .await
            .into_diagnostic()?;

            let _ = shutdown_tx.send(true);
            scheduled.await.into_diagnostic()?;
        }
    }

    Ok(())
}

fn open_storage(config: &Config) -> Result<(SharedLedger, SharedReconciliationLog)> {
    if let Some(db_path) = &config.db_path {
        #[cfg(feature = "storage-rocksdb")]
        {
            use payout_recon::infrastructure::rocksdb::RocksDbStore;

            let store = RocksDbStore::open(db_path).into_diagnostic()?;
            info!(path = %db_path.display(), "Using RocksDB storage");
            return Ok((Arc::new(store.clone()), Arc::new(store)));
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        {
            let _ = db_path;
            warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
            );
        }
    }

    Ok((
        Arc::new(InMemoryPayoutLedger::new()),
        Arc::new(InMemoryReconciliationLog::new()),
    ))
}

fn provider(config: &Config) -> Result<SharedGateway> {
    match &config.provider_url {
        Some(url) => {
            let gateway = HttpProviderGateway::new(
                url.clone(),
                config.provider_api_key.clone(),
                config.currency.clone(),
                config.provider_timeout(),
            )
            .into_diagnostic()?;
            Ok(Arc::new(gateway))
        }
        None => {
            warn!("No --provider-url configured, using the simulated provider");
            Ok(Arc::new(MockProviderGateway::new()))
        }
    }
}

fn notifier(config: &Config) -> Result<SharedNotifier> {
    match &config.notifier_url {
        Some(url) => {
            let notifier =
                HttpNotifier::new(url.clone(), config.provider_timeout()).into_diagnostic()?;
            Ok(Arc::new(notifier))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}
