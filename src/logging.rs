use crate::config::LoggingConfig;
use tracing::subscriber::set_global_default;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Prefix of the rolling JSON log file.
pub const LOG_FILE_PREFIX: &str = "vitals.log";

fn rotation(raw: &str) -> Rotation {
    match raw.trim().to_ascii_lowercase().as_str() {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// Initialize structured logging for the monitor.
///
/// JSON records go to a rolling `vitals.log` under `log_dir`. The plain
/// console layer can be switched off for unattended runs. `RUST_LOG`
/// overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = RollingFileAppender::new(rotation(&config.rotation), &config.log_dir, LOG_FILE_PREFIX);

    let file_layer = fmt::layer()
        .json()
        .with_writer(file_appender)
        .with_target(true)
        .with_thread_names(true);

    let console_layer = config.console.then(|| fmt::layer().with_target(true));

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = Registry::default()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);

    set_global_default(subscriber)?;

    tracing::info!(
        level = %config.level,
        log_dir = %config.log_dir,
        rotation = %config.rotation,
        "Logging initialized"
    );

    Ok(())
}

/// Clinical event record (notification raised, lockdown entered or lifted).
/// Never pass raw vital values as the outcome.
#[macro_export]
macro_rules! clinical_event {
    ($event_type:expr, $subject:expr, $outcome:expr) => {
        tracing::info!(
            event_type = $event_type,
            subject = %$subject,
            outcome = $outcome,
            timestamp = chrono::Utc::now().to_rfc3339(),
            "CLINICAL_EVENT"
        );
    };
}
