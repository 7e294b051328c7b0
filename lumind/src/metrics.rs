//! Prometheus metrics for webhook deliveries and ingestions.
//!
//! Metrics live in a crate-local registry; [`register_metrics`] must be called
//! once at startup (repeat calls are no-ops) and [`encode_metrics`] renders
//! the text exposition format for `/metrics`.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Webhook deliveries by outcome (`processed`, `ignored`, `rejected`,
    /// `not_found`, `failed`).
    pub static ref WEBHOOK_DELIVERIES: IntCounterVec = IntCounterVec::new(
        Opts::new("lumin_webhook_deliveries_total", "Webhook deliveries by outcome"),
        &["outcome"]
    )
    .unwrap_or_else(|e| panic!("invalid metric definition: {e}"));

    /// Ingestion failures by stage (`fetch`, `extract`, `materialize`).
    pub static ref INGESTION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("lumin_ingestion_failures_total", "Failed ingestions by stage"),
        &["stage"]
    )
    .unwrap_or_else(|e| panic!("invalid metric definition: {e}"));

    pub static ref FILES_MATERIALIZED: IntCounter = IntCounter::new(
        "lumin_files_materialized_total",
        "Files written into project trees"
    )
    .unwrap_or_else(|e| panic!("invalid metric definition: {e}"));

    pub static ref INGESTIONS_IN_FLIGHT: IntGauge = IntGauge::new(
        "lumin_ingestions_in_flight",
        "Ingestions currently running"
    )
    .unwrap_or_else(|e| panic!("invalid metric definition: {e}"));

    /// End-to-end ingestion duration by result.
    pub static ref INGESTION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("lumin_ingestion_duration_seconds", "Ingestion duration")
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["result"]
    )
    .unwrap_or_else(|e| panic!("invalid metric definition: {e}"));
}

static REGISTERED: OnceLock<Result<(), String>> = OnceLock::new();

/// Register all metrics with [`REGISTRY`].
pub fn register_metrics() -> Result<(), prometheus::Error> {
    REGISTERED
        .get_or_init(|| register_all().map_err(|e| e.to_string()))
        .clone()
        .map_err(prometheus::Error::Msg)
}

fn register_all() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(WEBHOOK_DELIVERIES.clone()))?;
    REGISTRY.register(Box::new(INGESTION_FAILURES.clone()))?;
    REGISTRY.register(Box::new(FILES_MATERIALIZED.clone()))?;
    REGISTRY.register(Box::new(INGESTIONS_IN_FLIGHT.clone()))?;
    REGISTRY.register(Box::new(INGESTION_DURATION.clone()))?;
    Ok(())
}

/// Render every registered metric in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub fn record_delivery(outcome: &str) {
    WEBHOOK_DELIVERIES.with_label_values(&[outcome]).inc();
}

/// Holds one slot of [`INGESTIONS_IN_FLIGHT`] until dropped.
pub struct InFlightGuard(());

impl InFlightGuard {
    pub fn enter() -> Self {
        INGESTIONS_IN_FLIGHT.inc();
        Self(())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        INGESTIONS_IN_FLIGHT.dec();
    }
}

pub fn record_ingestion_success(files: usize, duration_secs: f64) {
    FILES_MATERIALIZED.inc_by(files as u64);
    INGESTION_DURATION
        .with_label_values(&["success"])
        .observe(duration_secs);
}

pub fn record_ingestion_failure(stage: &str, duration_secs: f64) {
    INGESTION_FAILURES.with_label_values(&[stage]).inc();
    INGESTION_DURATION
        .with_label_values(&["failure"])
        .observe(duration_secs);
}
