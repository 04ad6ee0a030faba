use crate::config::LogLevel;
use tracing::Level;

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the level given on the command line. Output goes to
/// stderr so command output on stdout stays machine readable.
pub fn setup_tracing(log_level: LogLevel) {
    let level: Level = log_level.into();
    let default_filter = format!("payout_recon={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
