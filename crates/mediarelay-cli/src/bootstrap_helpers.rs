use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub(crate) const LOG_FILTER_ENV: &str = "MEDIARELAY_LOG";

/// Logs go to stderr so reports printed on stdout stay machine-readable.
pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(LOG_FILTER_ENV)
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
