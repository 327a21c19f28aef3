use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, Method},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use super::jobs_routes::{get_job, list_jobs, trigger_job};
use super::library_routes::{
    delete_library_entry, get_export, get_library_entry, get_library_stats, list_library,
    post_cleanup, post_import, post_ingest, post_verify,
};
use super::log_requests;
use super::metrics::metrics_handler;
use super::state::{
    GuardedIndexManager, GuardedStreamDelivery, OptionalSchedulerHandle, ServerState,
};
use super::stream_routes::{get_playback_source, proxy_url, stream_remote_track, stream_track};
use super::ServerConfig;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
    pub local_tracks: usize,
    pub local_bytes: u64,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let index_stats = state.index.stats();
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        local_tracks: index_stats.entries,
        local_bytes: index_stats.total_size_bytes,
    };
    Json(stats)
}

impl ServerState {
    fn new(
        config: ServerConfig,
        index: GuardedIndexManager,
        delivery: GuardedStreamDelivery,
        scheduler_handle: OptionalSchedulerHandle,
    ) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            index,
            delivery,
            scheduler_handle,
            hash: env!("GIT_HASH").to_owned(),
        }
    }
}

fn stream_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([header::RANGE])
        .expose_headers([
            header::CONTENT_LENGTH,
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
            header::CONTENT_TYPE,
        ])
}

pub fn make_app(
    config: ServerConfig,
    index: GuardedIndexManager,
    delivery: GuardedStreamDelivery,
    scheduler_handle: OptionalSchedulerHandle,
) -> Router {
    let state = ServerState::new(config, index, delivery, scheduler_handle);

    let stream_routes: Router = Router::new()
        .route("/stream/{track_id}", get(stream_track))
        .route("/stream/{track_id}/remote", get(stream_remote_track))
        .route("/proxy", get(proxy_url))
        .route("/playback/{track_id}", get(get_playback_source))
        .layer(stream_cors_layer())
        .with_state(state.clone());

    let library_routes: Router = Router::new()
        .route("/", get(list_library))
        .route("/stats", get(get_library_stats))
        .route("/ingest", post(post_ingest))
        .route("/verify", post(post_verify))
        .route("/cleanup", post(post_cleanup))
        .route("/export", get(get_export))
        .route("/import", post(post_import))
        .route(
            "/{retrieval_id}",
            get(get_library_entry).delete(delete_library_entry),
        )
        .with_state(state.clone());

    let admin_routes: Router = Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/trigger", post(trigger_job))
        .with_state(state.clone());

    Router::new()
        .route("/", get(home))
        .with_state(state.clone())
        .nest("/v1", stream_routes)
        .nest("/v1/library", library_routes)
        .nest("/v1/admin", admin_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

pub async fn run_server(
    config: ServerConfig,
    index: GuardedIndexManager,
    delivery: GuardedStreamDelivery,
    scheduler_handle: OptionalSchedulerHandle,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let app = make_app(config, index, delivery, scheduler_handle);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    tokio::try_join!(
        axum::serve(listener, app),
        axum::serve(metrics_listener, make_metrics_app()),
    )?;
    Ok(())
}
