use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, TextEncoder};

static EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "fraud_detector_events_total",
            "Fraud events handled by the worker pool, by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create fraud_detector_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register fraud_detector_events_total");
    counter
});

static ALERTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("fraud_detector_alerts_total", "Alerts fired, by severity"),
        &["severity"],
    )
    .expect("failed to create fraud_detector_alerts_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register fraud_detector_alerts_total");
    counter
});

pub fn record_outcome(outcome: &str) {
    EVENTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_alert(severity: &str) {
    ALERTS_TOTAL.with_label_values(&[severity]).inc();
}

pub fn outcome_count(outcome: &str) -> u64 {
    EVENTS_TOTAL.with_label_values(&[outcome]).get()
}

/// Prometheus text exposition of the default registry
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
