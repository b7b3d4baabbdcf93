//! Diagnostic tracing for the `minion` binary.
//!
//! Everything goes to stderr so stdout stays free for run summaries and
//! streamed completions.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used with `--verbose` when `RUST_LOG` is unset.
pub const VERBOSE_FILTER: &str = "minion=debug";

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the filter is `warn`, or
/// [`VERBOSE_FILTER`] when `verbose` is true. Output: stderr, compact format.
///
/// ```bash
/// RUST_LOG=minion::llm=debug minion ask "hello"
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { VERBOSE_FILTER } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
