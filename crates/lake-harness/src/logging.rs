//! Test log output.

use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "lake_harness=debug,lake=debug,sqlx=warn,rdkafka=info";

static INIT: Once = Once::new();

/// Install the global subscriber for a test binary.
///
/// Safe to call from every test: only the first call installs anything. The
/// filter comes from `filter` (usually [`HarnessSettings::log_filter`]), then
/// `RUST_LOG`, then a default that keeps the harness targets at `debug`.
///
/// [`HarnessSettings::log_filter`]: crate::settings::HarnessSettings::log_filter
pub fn init_test_logging(filter: Option<&str>) {
    INIT.call_once(|| {
        let env_filter = filter
            .and_then(|f| tracing_subscriber::EnvFilter::try_new(f).ok())
            .or_else(|| tracing_subscriber::EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| DEFAULT_FILTER.into());

        // Another subscriber (e.g. a test's own) wins if it got there first.
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        init_test_logging(Some("lake_harness=trace"));
        init_test_logging(None);
        tracing::info!(target: "lake.env", "logging initialized twice without panicking");
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        init_test_logging(Some("=[not a filter"));
    }
}
