//! Debug logging utilities.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

/// Global debug flag.
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Environment variable for debug mode.
pub const SRT_DEBUG_ENV: &str = "SRT_DEBUG";

/// Initialize logging based on the SRT_DEBUG environment variable or explicit flag.
///
/// Output always goes to stderr: the proxy process owns stdout as its control
/// channel, and the wrapped command owns the terminal's stdout.
pub fn init_debug_logging(force_debug: bool) {
    let debug_enabled = force_debug || std::env::var(SRT_DEBUG_ENV).is_ok();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = if debug_enabled {
        EnvFilter::new("policy_sandbox=debug,srt_proxy=debug,warn")
    } else {
        EnvFilter::new("policy_sandbox=info,srt_proxy=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(debug_enabled)
        .try_init()
        .ok();
}

/// Check if debug mode is enabled.
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::SeqCst)
}
