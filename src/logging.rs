//! Log setup for the provider process.
//!
//! Everything goes to **stderr**: the host reads the handshake line from
//! stdout and would choke on anything else there.
//!
//! `RUST_LOG` selects what is shown, e.g.
//!
//! ```bash
//! RUST_LOG=hemmer_provider_elasticstack=debug ./hemmer-provider-elasticstack
//! ```
//!
//! At `debug` every REST call is logged with its method, path and status.
//! Credentials are held in `secrecy` types and never reach a log line.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Install the global subscriber.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(filter())
        .with(stderr_layer())
        .init();
}

/// Install the global subscriber unless one is already set.
///
/// Returns `false` when another subscriber won.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(filter())
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_parse() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
        assert!(EnvFilter::try_new("warn,hemmer_provider_elasticstack::clients=debug").is_ok());
    }

    #[test]
    fn test_try_init_twice() {
        try_init_logging();
        assert!(!try_init_logging());
    }
}
