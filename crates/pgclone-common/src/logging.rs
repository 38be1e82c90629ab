use tracing_subscriber::EnvFilter;

/// Output shape for the `--log-time-format`/JSON toggles named in spec.md
/// §6's environment-variable list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs the process-wide subscriber. Must be called exactly once, at the
/// top of `main`, before any worker task starts; this is the one piece of
/// global mutable state the design notes allow outside the catalog and the
/// sentinel row.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_env("PGCLONE_LOG")
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("default log filter is valid");

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}
