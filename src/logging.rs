//! Tracing subscriber setup.
//!
//! `log` records from the library crates are forwarded through the
//! subscriber's `tracing-log` bridge.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber. `RUST_LOG` overrides `level`.
pub fn init_logging(level: Option<&str>, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or(DEFAULT_FILTER)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json || cfg!(feature = "logs-json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("logging already initialised: {}", e);
    }
}
