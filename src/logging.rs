use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "MECHCAT_LOG";

/// Install a fmt subscriber filtered by `MECHCAT_LOG` (default `warn`).
///
/// Does nothing if the host process already installed a global subscriber.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
