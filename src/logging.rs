//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! Two modes:
//! - **Server** ([`init_server`]): console layer, plus a JSON file layer
//!   (daily rotation) when a logs directory is configured
//! - **CLI** ([`init_cli`]): console-only for one-shot subcommands
//!
//! All output goes to stderr so command results on stdout stay clean.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Holds the non-blocking writer guard for file logging.
///
/// The [`WorkerGuard`] must be kept alive for the duration of the process.
/// Dropping it flushes pending log entries and closes the file.
pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialise logging for the `serve` subcommand.
///
/// With `config.dir` set, writes JSON logs to
/// `{dir}/policy-agent.log.YYYY-MM-DD` with daily rotation. Always emits
/// human-readable output to stderr. `RUST_LOG` overrides `config.level`.
///
/// Returns a [`LoggingGuard`] that must be kept alive for log flushing.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init_server(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let (json_layer, guard) = match config.dir.as_deref() {
        Some(logs_dir) => {
            std::fs::create_dir_all(logs_dir).map_err(|e| {
                anyhow::anyhow!(
                    "failed to create logs directory {}: {e}",
                    logs_dir.display()
                )
            })?;
            let file_appender = tracing_appender::rolling::daily(logs_dir, "policy-agent.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(json_layer)
        .with(console_layer)
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise minimal logging for one-shot subcommands.
///
/// Emits human-readable output to stderr only. Controlled by `RUST_LOG`
/// (default: `level`).
pub fn init_cli(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .init();
}
