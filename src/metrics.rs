use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

fn register<C: prometheus::core::Collector + Clone + 'static>(collector: C, name: &str) -> C {
    prometheus::default_registry()
        .register(Box::new(collector.clone()))
        .unwrap_or_else(|e| panic!("failed to register {name}: {e}"));
    collector
}

pub static MESSAGES_SENT: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("chat_messages_sent_total", "Messages persisted by send")
        .expect("failed to create chat_messages_sent_total");
    register(counter, "chat_messages_sent_total")
});

pub static HUB_FRAMES_DELIVERED: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_hub_frames_delivered_total",
            "Frames enqueued to live connections",
        ),
        &["event"],
    )
    .expect("failed to create chat_hub_frames_delivered_total");
    register(counter, "chat_hub_frames_delivered_total")
});

pub static HUB_CONNECTIONS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_hub_connections_dropped_total",
            "Live connections dropped by the hub",
        ),
        &["reason"],
    )
    .expect("failed to create chat_hub_connections_dropped_total");
    register(counter, "chat_hub_connections_dropped_total")
});

pub static HUB_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("chat_hub_connections", "Currently registered live connections")
        .expect("failed to create chat_hub_connections");
    register(gauge, "chat_hub_connections")
});

pub static FANOUT_JOBS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_fanout_jobs_rejected_total",
            "Fan-out jobs rejected because a worker queue was full or closed",
        ),
        &["kind"],
    )
    .expect("failed to create chat_fanout_jobs_rejected_total");
    register(counter, "chat_fanout_jobs_rejected_total")
});

pub static NOTIFICATIONS_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "chat_notifications_failed_total",
        "Notification dispatches that failed or timed out",
    )
    .expect("failed to create chat_notifications_failed_total");
    register(counter, "chat_notifications_failed_total")
});

pub static STORAGE_TIMEOUTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("chat_storage_timeouts_total", "Storage calls that hit their deadline"),
        &["operation"],
    )
    .expect("failed to create chat_storage_timeouts_total");
    register(counter, "chat_storage_timeouts_total")
});

/// GET /metrics
pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
