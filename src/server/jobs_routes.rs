//! Admin endpoints for the background job scheduler.

use super::state::OptionalSchedulerHandle;
use crate::background_jobs::JobError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

fn scheduler_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "Job scheduler not available" })),
    )
        .into_response()
}

pub async fn list_jobs(State(scheduler): State<OptionalSchedulerHandle>) -> Response {
    match scheduler {
        Some(scheduler) => Json(scheduler.list_jobs().await).into_response(),
        None => scheduler_unavailable(),
    }
}

pub async fn get_job(
    State(scheduler): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
) -> Response {
    let Some(scheduler) = scheduler else {
        return scheduler_unavailable();
    };
    match scheduler.get_job(&job_id).await {
        Some(job) => Json(job).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn trigger_job(
    State(scheduler): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
) -> Response {
    let Some(scheduler) = scheduler else {
        return scheduler_unavailable();
    };
    match scheduler.trigger_job(&job_id).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "job_id": job_id, "triggered": true })),
        )
            .into_response(),
        Err(e) => {
            let status = match e {
                JobError::NotFound => StatusCode::NOT_FOUND,
                JobError::AlreadyRunning => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}
