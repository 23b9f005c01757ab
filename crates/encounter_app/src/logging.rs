use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::settings::{AppSettings, LogSettings};

pub const DEFAULT_FILTER: &str =
    "info,encounter_app=debug,encounter_engine=debug,encounter_radio=info";

/// Initializes logging: a daily file under the configured directory (or
/// `~/.encounter/logs/`), plus a compact console copy when enabled.
/// `RUST_LOG` overrides the configured filter.
/// Returns a guard that must be kept alive for the duration of the app.
pub fn init_logging(settings: &LogSettings) -> Result<WorkerGuard> {
    let logs_dir = match &settings.dir {
        Some(dir) => dir.clone(),
        None => AppSettings::logs_dir()?,
    };
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create log directory {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&logs_dir, "encounter");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(&settings.filter)?,
    };
    let console = settings
        .console
        .then(|| fmt::layer().with_target(false).compact());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .with(console)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

fn parse_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives).with_context(|| format!("Invalid log filter {directives:?}"))
}
