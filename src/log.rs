//! Structured logging setup.
//!
//! All modules log through `tracing` macros. The subscriber installed here
//! honours `RUST_LOG`; without it the level is INFO, or DEBUG when debug
//! mode is requested with `--debug` or `WAGON_DEBUG=1`.

use tracing_subscriber::EnvFilter;

/// Environment variable that switches on debug logging.
pub const DEBUG_ENV: &str = "WAGON_DEBUG";

/// Initialize the global subscriber. Safe to call more than once.
pub fn init(debug: bool) {
    let level = default_level(debug || env_debug());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn default_level(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}
