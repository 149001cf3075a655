//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Default filter directive when neither `RUST_LOG` nor `--log-level` is given.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`.
///
/// Falls back to `default_directive` when `RUST_LOG` is unset or invalid.
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Creates the span every agent task runs inside of.
pub fn agent_span(kind: &'static str, address: &str) -> tracing::Span {
    tracing::info_span!("agent", kind, address)
}
