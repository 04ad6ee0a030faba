use crate::application::dispatcher::DispatchConfig;
use crate::application::retry::RetryPolicy;
use crate::application::sweeper::SweepConfig;
use crate::error::{PayoutError, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Payout disbursement and reconciliation", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Serve the HTTP API and run the scheduled reconciliation sweeper
    Serve,
    /// Dispatch a batch of payouts read from a CSV file and print the report
    Dispatch {
        /// Input batch CSV file
        input: PathBuf,
    },
    /// Run one reconciliation sweep and print the run as JSON
    Reconcile,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Deployment settings, read from flags or `PAYOUT_*` environment variables.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct Config {
    #[arg(long, env = "PAYOUT_LOG_LEVEL", value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "PAYOUT_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    #[arg(long, env = "PAYOUT_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    pub listen_addr: SocketAddr,

    /// Base URL of the payout provider. Without it a simulated provider is used.
    #[arg(long, env = "PAYOUT_PROVIDER_URL", global = true)]
    pub provider_url: Option<String>,

    #[arg(long, env = "PAYOUT_PROVIDER_API_KEY", hide_env_values = true)]
    pub provider_api_key: Option<String>,

    /// Currency sent with every submission.
    #[arg(long, env = "PAYOUT_CURRENCY", default_value = "KES")]
    pub currency: String,

    /// Timeout of a single provider call.
    #[arg(long, env = "PAYOUT_PROVIDER_TIMEOUT_MS", default_value = "10000")]
    pub provider_timeout_ms: u64,

    /// Retries after the first attempt for transient provider failures.
    #[arg(long, env = "PAYOUT_MAX_RETRIES", default_value = "3")]
    pub max_retries: usize,

    #[arg(long, env = "PAYOUT_RETRY_MIN_DELAY_MS", default_value = "500")]
    pub retry_min_delay_ms: u64,

    #[arg(long, env = "PAYOUT_RETRY_MAX_DELAY_MS", default_value = "5000")]
    pub retry_max_delay_ms: u64,

    /// Maximum concurrent provider calls per batch or sweep.
    #[arg(long, env = "PAYOUT_CONCURRENCY", default_value = "8")]
    pub concurrency: usize,

    /// Dispatched payouts updated more recently than this are not swept.
    #[arg(long, env = "PAYOUT_GRACE_PERIOD_SECS", default_value = "900", global = true)]
    pub grace_period_secs: u64,

    /// Dispatched this long without a final status raises a stale alert.
    #[arg(long, env = "PAYOUT_STALENESS_CEILING_SECS", default_value = "86400")]
    pub staleness_ceiling_secs: u64,

    #[arg(long, env = "PAYOUT_SWEEP_INTERVAL_SECS", default_value = "300")]
    pub sweep_interval_secs: u64,

    /// Webhook receiving notifications as JSON. Without it notifications are logged.
    #[arg(long, env = "PAYOUT_NOTIFIER_URL")]
    pub notifier_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            db_path: None,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            provider_url: None,
            provider_api_key: None,
            currency: "KES".to_string(),
            provider_timeout_ms: 10_000,
            max_retries: 3,
            retry_min_delay_ms: 500,
            retry_max_delay_ms: 5_000,
            concurrency: 8,
            grace_period_secs: 900,
            staleness_ceiling_secs: 86_400,
            sweep_interval_secs: 300,
            notifier_url: None,
        }
    }
}

impl Config {
    /// Rejects settings the components cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.staleness_ceiling_secs <= self.grace_period_secs {
            return Err(PayoutError::ValidationError(format!(
                "Staleness ceiling ({}s) must be longer than the grace period ({}s)",
                self.staleness_ceiling_secs, self.grace_period_secs
            )));
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.provider_timeout(),
            max_retries: self.max_retries,
            min_delay: Duration::from_millis(self.retry_min_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            concurrency: self.concurrency,
            retry: self.retry_policy(),
        }
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            grace_period: Duration::from_secs(self.grace_period_secs),
            staleness_ceiling: Duration::from_secs(self.staleness_ceiling_secs),
            interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            concurrency: self.concurrency,
            retry: self.retry_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_component_defaults() {
        let cli = Cli::try_parse_from(["payout-recon", "reconcile"]).unwrap();
        assert_eq!(cli.command, Command::Reconcile);
        assert_eq!(cli.config, Config::default());
        assert_eq!(cli.config.dispatch_config(), DispatchConfig::default());
        assert_eq!(cli.config.sweep_config(), SweepConfig::default());
    }

    #[test]
    fn test_flags_build_component_configs() {
        let cli = Cli::try_parse_from([
            "payout-recon",
            "--grace-period-secs",
            "0",
            "--max-retries",
            "1",
            "dispatch",
            "batch.csv",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(
            cli.command,
            Command::Dispatch {
                input: PathBuf::from("batch.csv")
            }
        );
        assert_eq!(cli.config.log_level, LogLevel::Debug);
        assert_eq!(cli.config.sweep_config().grace_period, Duration::ZERO);
        assert_eq!(cli.config.dispatch_config().retry.max_retries, 1);
    }

    #[test]
    fn test_staleness_ceiling_must_exceed_grace_period() {
        assert!(Config::default().validate().is_ok());

        for ceiling in ["900", "60"] {
            let cli = Cli::try_parse_from([
                "payout-recon",
                "--grace-period-secs",
                "900",
                "--staleness-ceiling-secs",
                ceiling,
                "reconcile",
            ])
            .unwrap();
            assert!(matches!(
                cli.config.validate(),
                Err(PayoutError::ValidationError(_))
            ));
        }
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        assert!(Cli::try_parse_from(["payout-recon", "--log-level", "loud", "serve"]).is_err());
    }
}
