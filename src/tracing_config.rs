//! A minimal dev-time `tracing` subscriber, for examples and local test runs that want to see the
//! `tracing::event!`/`debug!` calls this crate emits at every pipeline stage transition without
//! pulling in a full observability stack.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Install a global subscriber that prints to stderr, filtered by `RUST_LOG` (defaulting to
/// `info` if unset). Intended for `examples/` and local `cargo test -- --nocapture` runs, not for
/// production use: this crate's actual operators are expected to wire `tracing` into whatever
/// subscriber their surrounding framework already runs.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(filter);

    let registry = tracing_subscriber::registry().with(subscriber);

    if tracing::subscriber::set_global_default(registry).is_err() {
        tracing::debug!("global tracing subscriber already set");
    }
}
