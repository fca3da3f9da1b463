//! Counters, histograms, and gauges for the engine's health and performance.
//!
//! Names and kinds follow the `metrics` facade; a Prometheus exporter is
//! installed once at startup (see `main.rs`).

use metrics::{describe_counter, describe_gauge, describe_histogram};
use std::time::Duration;

/// Registers metric descriptions so they show up in `/metrics` output even
/// before the first observation.
pub fn describe() {
    describe_histogram!("stream_lag_ms", "Time between event ts_event and consumption");
    describe_counter!("events_processed_total", "Number of events processed");
    describe_histogram!("calc_latency_ms", "Time spent computing a report");
    describe_gauge!("report_age_ms", "Age of the most recently published report");
    describe_counter!("errors_total", "Errors by component and error_type");
}

pub fn record_stream_lag(ts_event: chrono::DateTime<chrono::Utc>, now: chrono::DateTime<chrono::Utc>) {
    let lag_ms = (now - ts_event).num_milliseconds().max(0) as f64;
    metrics::histogram!("stream_lag_ms", lag_ms);
}

pub fn record_event_processed() {
    metrics::increment_counter!("events_processed_total");
}

pub fn record_calc_latency(elapsed: Duration) {
    metrics::histogram!("calc_latency_ms", elapsed.as_secs_f64() * 1000.0);
}

pub fn record_report_age(age: Duration) {
    metrics::gauge!("report_age_ms", age.as_secs_f64() * 1000.0);
}

pub fn record_error(component: &str, error_type: &str) {
    metrics::increment_counter!("errors_total", "component" => component.to_string(), "error_type" => error_type.to_string());
}
