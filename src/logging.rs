//! Structured logging setup
//!
//! The instrumentation logs through `tracing`. Hosts that already install a
//! subscriber keep theirs; `init_logging` only installs one when none exists.
//!
//! Filter resolution order:
//! 1. `CIVIS_LOG`
//! 2. `RUST_LOG`
//! 3. the `default_directive` argument (or [`DEFAULT_DIRECTIVE`])

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter: quiet for the host, informative for civis itself
pub const DEFAULT_DIRECTIVE: &str = "warn,civis=info";

/// Environment variable checked before `RUST_LOG`
pub const LOG_ENV_VAR: &str = "CIVIS_LOG";

/// Initialize console logging.
///
/// Returns `false` if a global subscriber was already installed, which is
/// not an error: the host's subscriber wins.
///
/// # Example
/// ```ignore
/// civis::logging::init_logging(None);
/// ```
pub fn init_logging(default_directive: Option<&str>) -> bool {
    let filter = build_filter(default_directive);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(version = env!("CARGO_PKG_VERSION"), "civis logging initialized");
    }
    installed
}

/// Same as [`init_logging`] but emits one JSON object per line
pub fn init_json_logging(default_directive: Option<&str>) -> bool {
    let filter = build_filter(default_directive);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .is_ok()
}

fn build_filter(default_directive: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive.unwrap_or(DEFAULT_DIRECTIVE)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let _ = init_logging(None);
        // Second install always loses to the first
        assert!(!init_logging(Some("debug")));
    }
}
