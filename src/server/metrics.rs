use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all moodplay metrics
const PREFIX: &str = "moodplay";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Playback Metrics
    pub static ref PLAYBACK_RESOLUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_playback_resolutions_total"), "Playback sources resolved, by kind"),
        &["kind"]
    ).expect("Failed to create playback_resolutions_total metric");

    pub static ref LOCAL_FALLBACKS_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_local_fallbacks_total"),
        "Local copies that failed to open and fell back to remote"
    ).expect("Failed to create local_fallbacks_total metric");

    pub static ref STREAMED_BYTES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_streamed_bytes_total"), "Bytes streamed to clients, by source"),
        &["source"]
    ).expect("Failed to create streamed_bytes_total metric");

    pub static ref DELIVERY_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_delivery_failures_total"), "Failed or rejected deliveries, by reason"),
        &["reason"]
    ).expect("Failed to create delivery_failures_total metric");

    // Content Index Metrics
    pub static ref INDEX_ENTRIES: Gauge = Gauge::new(
        format!("{PREFIX}_index_entries"),
        "Entries in the content index"
    ).expect("Failed to create index_entries metric");

    pub static ref INDEX_SIZE_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_index_size_bytes"),
        "Total size of locally retained files in bytes"
    ).expect("Failed to create index_size_bytes metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job executions"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");

    // Process Metrics
    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PLAYBACK_RESOLUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LOCAL_FALLBACKS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STREAMED_BYTES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DELIVERY_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INDEX_ENTRIES.clone()));
    let _ = REGISTRY.register(Box::new(INDEX_SIZE_BYTES.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Collapses ids out of a request path so metric labels stay bounded.
pub fn categorize_endpoint(path: &str) -> &'static str {
    if path.starts_with("/v1/stream/") {
        if path.ends_with("/remote") {
            "stream_remote"
        } else {
            "stream"
        }
    } else if path.starts_with("/v1/proxy") {
        "proxy"
    } else if path.starts_with("/v1/playback/") {
        "playback"
    } else if path.starts_with("/v1/library") {
        "library"
    } else if path.starts_with("/v1/admin") {
        "admin"
    } else if path == "/" {
        "home"
    } else {
        "other"
    }
}

pub fn record_playback_resolution(kind: &str) {
    PLAYBACK_RESOLUTIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_local_fallback() {
    LOCAL_FALLBACKS_TOTAL.inc();
}

pub fn record_streamed_bytes(source: &str, bytes: u64) {
    if bytes > 0 {
        STREAMED_BYTES_TOTAL
            .with_label_values(&[source])
            .inc_by(bytes as f64);
    }
}

pub fn record_delivery_failure(reason: &str) {
    DELIVERY_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn set_index_totals(entries: usize, size_bytes: u64) {
    INDEX_ENTRIES.set(entries as f64);
    INDEX_SIZE_BYTES.set(size_bytes as f64);
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // Parse the RSS (Resident Set Size) in kB
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<f64>() {
                            PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
