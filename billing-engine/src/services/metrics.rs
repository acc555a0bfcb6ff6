//! Metrics module for billing-engine.
//! Prometheus metrics for invoicing runs, lifecycle transitions and collaborator calls.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Store operation duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "billing_engine_db_query_duration_seconds",
            "Store operation duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Invoices created, by tax mode
pub static INVOICES_CREATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Invoicing outcomes per client (invoiced, skipped, failed)
pub static INVOICING_OUTCOMES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Lifecycle transitions by entity and target state
pub static LIFECYCLE_TRANSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Cancellation protocol steps
pub static CANCELLATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Supplier invoice reconciliation outcomes
pub static RECONCILIATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Inbound webhook events
pub static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Failed collaborator calls
pub static EXTERNAL_FAILURES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// HTTP request duration histogram
pub static HTTP_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    INVOICES_CREATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_invoices_created_total",
                "Invoices created by tax mode"
            ),
            &["tax_mode"]
        )
        .expect("Failed to register INVOICES_CREATED_TOTAL")
    });

    INVOICING_OUTCOMES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_invoicing_outcomes_total",
                "Per-client outcomes of monthly invoicing runs"
            ),
            &["outcome"]
        )
        .expect("Failed to register INVOICING_OUTCOMES_TOTAL")
    });

    LIFECYCLE_TRANSITIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_lifecycle_transitions_total",
                "Client and subscription state transitions"
            ),
            &["entity", "to"]
        )
        .expect("Failed to register LIFECYCLE_TRANSITIONS_TOTAL")
    });

    CANCELLATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_cancellations_total",
                "Cancellation requests by type and step"
            ),
            &["cancel_type", "step"]
        )
        .expect("Failed to register CANCELLATIONS_TOTAL")
    });

    RECONCILIATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_reconciliations_total",
                "Supplier invoice checks by outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register RECONCILIATIONS_TOTAL")
    });

    WEBHOOK_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_webhook_events_total",
                "Inbound webhook events by source and outcome"
            ),
            &["source", "outcome"]
        )
        .expect("Failed to register WEBHOOK_EVENTS_TOTAL")
    });

    EXTERNAL_FAILURES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_external_failures_total",
                "Failed collaborator calls by service and kind"
            ),
            &["service", "kind"]
        )
        .expect("Failed to register EXTERNAL_FAILURES_TOTAL")
    });

    HTTP_REQUEST_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "billing_engine_http_request_duration_seconds",
                "HTTP request duration",
                vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
            ),
            &["method", "status"]
        )
        .expect("Failed to register HTTP_REQUEST_DURATION")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_errors_total",
                "Total errors by type for alerting"
            ),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_invoice_created(tax_mode: &str) {
    if let Some(counter) = INVOICES_CREATED_TOTAL.get() {
        counter.with_label_values(&[tax_mode]).inc();
    }
}

pub fn record_invoicing_outcome(outcome: &str) {
    if let Some(counter) = INVOICING_OUTCOMES_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_transition(entity: &str, to: &str) {
    if let Some(counter) = LIFECYCLE_TRANSITIONS_TOTAL.get() {
        counter.with_label_values(&[entity, to]).inc();
    }
}

pub fn record_cancellation(cancel_type: &str, step: &str) {
    if let Some(counter) = CANCELLATIONS_TOTAL.get() {
        counter.with_label_values(&[cancel_type, step]).inc();
    }
}

pub fn record_reconciliation(outcome: &str) {
    if let Some(counter) = RECONCILIATIONS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_webhook_event(source: &str, outcome: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[source, outcome]).inc();
    }
}

pub fn record_external_failure(service: &str, kind: &str) {
    if let Some(counter) = EXTERNAL_FAILURES_TOTAL.get() {
        counter.with_label_values(&[service, kind]).inc();
    }
}

/// Record HTTP request duration.
pub fn record_http_request_duration(method: &str, status: &str, duration_secs: f64) {
    if let Some(histogram) = HTTP_REQUEST_DURATION.get() {
        histogram
            .with_label_values(&[method, status])
            .observe(duration_secs);
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
