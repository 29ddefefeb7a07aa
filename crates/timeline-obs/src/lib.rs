//! Process-wide Prometheus collectors for the prediction service.

use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, TextEncoder};

pub static REQUESTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("timeline_requests_total", "Total number of prediction requests").unwrap()
});

pub static REQUEST_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!(
        "timeline_request_errors_total",
        "Failed prediction requests by class",
        &["class"]
    )
    .unwrap()
});

pub static EVENTS_GENERATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("timeline_events_generated_total", "Events appended by the decoder").unwrap()
});

pub static DECODE_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    prometheus::register_histogram!("timeline_decode_seconds", "Wall time of one full decode").unwrap()
});

pub static STOP_REASON_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!(
        "timeline_stop_reason_total",
        "Why decoding ended",
        &["reason"]
    )
    .unwrap()
});

pub fn init() {
    // Touch statics so every series shows up on the first scrape.
    let _ = &*REQUESTS_TOTAL;
    let _ = &*REQUEST_ERRORS_TOTAL;
    let _ = &*EVENTS_GENERATED_TOTAL;
    let _ = &*DECODE_SECONDS;
    let _ = &*STOP_REASON_TOTAL;
}

pub fn record_decode(events: usize, stop_reason: &str, seconds: f64) {
    EVENTS_GENERATED_TOTAL.inc_by(events as u64);
    STOP_REASON_TOTAL.with_label_values(&[stop_reason]).inc();
    DECODE_SECONDS.observe(seconds);
}

pub fn record_error(client: bool) {
    let class = if client { "client" } else { "server" };
    REQUEST_ERRORS_TOTAL.with_label_values(&[class]).inc();
}

/// Renders the default registry in the text exposition format.
pub fn gather_text() -> (String, Vec<u8>) {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        buffer = format!("# encode error: {e}\n").into_bytes();
    }
    (encoder.format_type().to_string(), buffer)
}
