//! Shared helpers for tests.
//!
//! Unit and integration tests drive channels on a virtual-clock runtime so
//! timer behavior is deterministic. `init_test_logging` wires `tracing`
//! output into the test harness; the first call wins.

use crate::runtime::Runtime;
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Initialize tracing output for tests.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// A deterministic runtime: virtual clock, auto-advancing timers.
#[must_use]
pub fn test_runtime() -> Runtime {
    init_test_logging();
    Runtime::builder().virtual_time().build()
}
