use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "FIXPOINT_LOG";

/// Install the stderr subscriber. Safe to call more than once.
pub fn init(verbose: bool) {
    let default = if verbose { "fixpoint=debug" } else { "fixpoint=info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
