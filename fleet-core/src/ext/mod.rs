use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

pub mod option_ext;

/// Pretty multi-line output capped at `level`, used by tests.
pub fn init_logger(level: tracing::Level) {
    let format = tracing_subscriber::fmt::format()
        .with_timer(LocalTime::rfc_3339())
        .with_thread_ids(true)
        .pretty();
    tracing_subscriber::FmtSubscriber::builder()
        .event_format(format)
        .with_max_level(level)
        .init();
}

/// Compact single-line output for long-running processes. `RUST_LOG` wins over `default`.
pub fn init_logger_with_filter(default: impl Into<EnvFilter>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    let format = tracing_subscriber::fmt::format()
        .with_timer(LocalTime::rfc_3339())
        .with_target(true)
        .compact();
    tracing_subscriber::FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .init();
}
