//! Tracing initialisation shared by Automend binaries.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. With `json` the
/// subscriber emits newline-delimited JSON records for log aggregation;
/// otherwise a compact human format without targets.
///
/// Calling this more than once is harmless: only the first call installs a
/// subscriber, later calls are ignored.
pub fn init_tracing(json: bool, level: Level) {
    // Dependencies stay at warn unless RUST_LOG says otherwise; our own
    // crates follow the requested level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,automend_core={level},automend_exec={level},automend_cli={level}"
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(fmt::layer().with_target(false).json()).try_init()
    } else {
        registry.with(fmt::layer().with_target(false).compact()).try_init()
    };
    // A second init (e.g. from tests) is not an error worth surfacing.
    drop(result);
}
