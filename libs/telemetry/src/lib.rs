//! Logging and metrics helpers shared by the campaign crates.
//! Installs the `tracing` subscriber and records labelled metrics through the
//! `metrics` facade; exporters are whatever recorder the host installs.

use anyhow::Result;

mod config;
mod context;
pub mod metrics;
mod tracing_init;

pub use config::TelemetryConfig;
pub use context::TelemetryLabels;
pub use self::metrics::{record_counter, record_gauge, record_histogram};
pub use tracing_init::init_telemetry;

/// Installs the subscriber configured from `RUST_LOG` and `LOG_FORMAT`.
pub fn install(service_name: &str) -> Result<()> {
    init_telemetry(TelemetryConfig::from_env(
        service_name,
        env!("CARGO_PKG_VERSION"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent() {
        install("wa-campaign-test").unwrap();
        install("wa-campaign-test").unwrap();
    }

    #[test]
    fn recorders_accept_labels_without_a_recorder() {
        let labels = TelemetryLabels::new("promo").with_campaign("c-1");
        record_counter("campaign_messages_sent", 1, &labels);
        record_histogram("campaign_send_latency_ms", 12.5, &labels);
        record_gauge("campaign_sends_in_flight", 2.0, &labels);
    }
}
