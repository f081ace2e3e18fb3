//! Logging configuration using tracing
//!
//! Structured logging to stderr with support for the RUST_LOG environment
//! variable. Mailbox actions are additionally emitted on the
//! [`ACTION_TARGET`] target so they can be filtered into their own stream.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing target used for the per-message action log
pub const ACTION_TARGET: &str = "mailsort::actions";

/// Initialize the tracing subscriber
///
/// Filtering precedence:
/// - `RUST_LOG` when set
/// - otherwise `default_level` (e.g. from the config file or `--verbose`)
/// - otherwise `"warn"` for quiet output
///
/// # Example RUST_LOG values
/// - `RUST_LOG=info` - Show info and above
/// - `RUST_LOG=mailsort=debug` - Debug level for the sorter
/// - `RUST_LOG=warn,mailsort::actions=info` - Only the action log
///
/// # Errors
/// Returns an error if the subscriber has already been initialized
pub fn init(default_level: Option<&str>) -> crate::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.unwrap_or("warn")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| crate::MailSortError::Other(format!("Failed to initialize tracing: {}", e)))?;

    Ok(())
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init(Some("debug"));
}
