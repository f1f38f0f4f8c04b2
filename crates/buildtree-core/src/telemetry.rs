//! Tracing setup for buildtree binaries.
//!
//! [`init_tracing`] installs the global subscriber once per process;
//! later calls are no-ops. The default filter keeps third-party crates
//! at `warn` and applies the requested level to the buildtree crates
//! only, so `-v` does not drown the output in runtime internals.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default directives when `RUST_LOG` is not set: buildtree crates at
/// `level`, everything else at `warn`.
fn default_filter(level: Level) -> EnvFilter {
    EnvFilter::new(format!(
        "warn,buildtree_core={level},buildtree_cli={level}"
    ))
}

/// Install the global tracing subscriber.
///
/// * `json` — emit newline-delimited JSON log lines instead of the
///   human-readable format.
/// * `level` — verbosity for the buildtree crates when `RUST_LOG` is
///   not set; `RUST_LOG` overrides everything.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}
