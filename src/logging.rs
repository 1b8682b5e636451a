use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "hr_evaluation_tracker=info,sqlx=warn";

/// Stderr subscriber so stdout stays free for command output. `RUST_LOG`
/// overrides the default filter.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}
