//! Prometheus metrics for APNs delivery

#[cfg(feature = "metrics")]
use prometheus::{register_histogram_vec, register_int_counter, register_int_counter_vec};

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;

use std::time::Duration;

#[cfg(feature = "metrics")]
static APNS_OUTCOMES: Lazy<prometheus::IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "apns_notification_outcomes_total",
        "Terminal outcomes of APNs send attempts",
        &["state", "reason"]
    )
    .expect("Failed to register APNs outcome metric")
});

#[cfg(feature = "metrics")]
static APNS_DELIVERY_DURATION: Lazy<prometheus::HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "apns_delivery_duration_seconds",
        "Time from building an APNs request to its classified outcome",
        &["state"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0]
    )
    .expect("Failed to register APNs delivery duration metric")
});

#[cfg(feature = "metrics")]
static APNS_TOKEN_REGENERATIONS: Lazy<prometheus::IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "apns_provider_token_regenerations_total",
        "Number of APNs provider tokens signed"
    )
    .expect("Failed to register APNs token regeneration metric")
});

/// Metrics collector for APNs delivery
pub struct ApnsMetrics;

#[cfg(feature = "metrics")]
impl ApnsMetrics {
    pub fn record_outcome(state: &str, reason: &str, elapsed: Duration) {
        APNS_OUTCOMES.with_label_values(&[state, reason]).inc();
        APNS_DELIVERY_DURATION
            .with_label_values(&[state])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_token_regeneration() {
        APNS_TOKEN_REGENERATIONS.inc();
    }
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
impl ApnsMetrics {
    pub fn record_outcome(_state: &str, _reason: &str, _elapsed: Duration) {}
    pub fn record_token_regeneration() {}
}
