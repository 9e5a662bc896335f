use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

static WS_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "livestream_service_ws_connections",
        "Currently open WebSocket viewer connections",
    )
    .expect("failed to create livestream_service_ws_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register livestream_service_ws_connections");
    gauge
});

static EVENTS_PUBLISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "livestream_service_events_published_total",
            "Stream events published to the per-stream topic",
        ),
        &["event"],
    )
    .expect("failed to create livestream_service_events_published_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register livestream_service_events_published_total");
    counter
});

static BROADCASTS_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "livestream_service_broadcasts_dropped_total",
        "Best-effort publishes that failed and were dropped",
    )
    .expect("failed to create livestream_service_broadcasts_dropped_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register livestream_service_broadcasts_dropped_total");
    counter
});

static JOB_TICKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "livestream_service_job_ticks_total",
            "Scheduler job ticks by outcome",
        ),
        &["job", "outcome"],
    )
    .expect("failed to create livestream_service_job_ticks_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register livestream_service_job_ticks_total");
    counter
});

pub fn connection_opened() {
    WS_CONNECTIONS.inc();
}

pub fn connection_closed() {
    WS_CONNECTIONS.dec();
}

pub fn event_published(event: &str) {
    EVENTS_PUBLISHED_TOTAL.with_label_values(&[event]).inc();
}

pub fn broadcast_dropped() {
    BROADCASTS_DROPPED_TOTAL.inc();
}

pub fn job_tick(job: &str, outcome: &str) {
    JOB_TICKS_TOTAL.with_label_values(&[job, outcome]).inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
