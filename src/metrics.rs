use actix_web::{HttpResponse, Responder};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Stream metrics
    pub static ref SAMPLES_RECEIVED: IntCounter = IntCounter::new(
        "vitals_samples_received_total",
        "Vital samples appended to the live window"
    ).unwrap();

    pub static ref MESSAGES_REJECTED: IntCounterVec = IntCounterVec::new(
        Opts::new("vitals_messages_rejected_total", "Inbound stream messages dropped"),
        &["reason"] // "decode", "out_of_range", "subject_mismatch" or "framing"
    ).unwrap();

    pub static ref STALE_EVENTS_DROPPED: IntCounter = IntCounter::new(
        "vitals_stale_events_dropped_total",
        "Events from a closed subscription that arrived after a subject change"
    ).unwrap();

    pub static ref STREAM_RECONNECTS: IntCounter = IntCounter::new(
        "vitals_stream_reconnects_total",
        "Streaming reconnect attempts"
    ).unwrap();

    pub static ref STREAM_CONNECTED: IntGauge = IntGauge::new(
        "vitals_stream_connected",
        "1 while the streaming channel is connected"
    ).unwrap();

    pub static ref WINDOW_LEN: IntGauge = IntGauge::new(
        "vitals_window_len",
        "Samples currently held in the vitals window"
    ).unwrap();

    // Alerting metrics
    pub static ref NOTIFICATIONS_RAISED: IntCounterVec = IntCounterVec::new(
        Opts::new("vitals_notifications_raised_total", "Local notifications raised"),
        &["kind"] // "threshold" or "anomaly"
    ).unwrap();

    // Lockdown metrics
    pub static ref LOCKDOWN_POLL_FAILURES: IntCounter = IntCounter::new(
        "lockdown_poll_failures_total",
        "Lockdown status polls that failed"
    ).unwrap();

    pub static ref LOCKDOWN_ACTIVE: IntGauge = IntGauge::new(
        "lockdown_active",
        "1 while the last known lockdown state is active"
    ).unwrap();
}

/// Register all collectors. Safe to call more than once.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(SAMPLES_RECEIVED.clone()),
        Box::new(MESSAGES_REJECTED.clone()),
        Box::new(STALE_EVENTS_DROPPED.clone()),
        Box::new(STREAM_RECONNECTS.clone()),
        Box::new(STREAM_CONNECTED.clone()),
        Box::new(WINDOW_LEN.clone()),
        Box::new(NOTIFICATIONS_RAISED.clone()),
        Box::new(LOCKDOWN_POLL_FAILURES.clone()),
        Box::new(LOCKDOWN_ACTIVE.clone()),
    ];

    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Render the registry in the Prometheus text format.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Prometheus metrics endpoint handler
pub async fn metrics_handler() -> impl Responder {
    match gather_text() {
        Ok(metrics) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(metrics),
        Err(e) => HttpResponse::InternalServerError().body(format!("Failed to encode metrics: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_rejection_counter_is_exported() {
        init_metrics().unwrap();
        MESSAGES_REJECTED.with_label_values(&["decode"]).inc();

        assert!(MESSAGES_REJECTED.with_label_values(&["decode"]).get() >= 1);
        let text = gather_text().unwrap();
        assert!(text.contains("vitals_messages_rejected_total"));
    }
}
