//! Content index endpoints: listing, ingest, removal and maintenance sweeps.

use super::state::GuardedIndexManager;
use crate::content_index::{
    CleanupOptions, IndexError, MediaFormat, RemoveOutcome, RetrievalRecord,
    TrackMetadata, TrackView,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::error;

#[derive(Deserialize, Debug, Default)]
pub struct LibraryQuery {
    pub q: Option<String>,
    pub mood: Option<String>,
    pub format: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct IngestBody {
    pub record: RetrievalRecord,
    #[serde(default)]
    pub metadata: TrackMetadata,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn index_error_response(e: IndexError) -> Response {
    match e {
        IndexError::InvalidImport(_) | IndexError::IncompatibleSchema { .. } => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        IndexError::Persistence(_) | IndexError::Serialization(_) => {
            error!("Content index operation failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn list_library(
    State(index): State<GuardedIndexManager>,
    Query(query): Query<LibraryQuery>,
) -> Response {
    let q = non_blank(query.q);
    let mood = non_blank(query.mood);
    let format = match non_blank(query.format) {
        Some(raw) => match raw.parse::<MediaFormat>() {
            Ok(format) => Some(format),
            Err(_) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown media format: {}", raw),
                )
            }
        },
        None => None,
    };

    let mut tracks: Vec<TrackView> = match (&q, &mood, format) {
        (Some(q), _, _) => index.search(q),
        (None, Some(mood), _) => index.filter_by_mood(mood),
        (None, None, Some(format)) => index.filter_by_format(format),
        (None, None, None) => index.list(),
    };

    // Remaining filters narrow whatever the first one selected.
    if q.is_some() {
        if let Some(mood) = &mood {
            tracks.retain(|t| t.mood_tags.iter().any(|m| m.eq_ignore_ascii_case(mood)));
        }
    }
    if q.is_some() || mood.is_some() {
        if let Some(format) = format {
            tracks.retain(|t| t.media_format == format);
        }
    }

    Json(tracks).into_response()
}

pub async fn get_library_stats(State(index): State<GuardedIndexManager>) -> Response {
    Json(index.stats()).into_response()
}

pub async fn get_library_entry(
    State(index): State<GuardedIndexManager>,
    Path(retrieval_id): Path<String>,
) -> Response {
    match index.get(&retrieval_id) {
        Some(track) => Json(track).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn post_ingest(
    State(index): State<GuardedIndexManager>,
    Json(body): Json<IngestBody>,
) -> Response {
    match index.ingest(&body.record, &body.metadata) {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => index_error_response(e),
    }
}

pub async fn delete_library_entry(
    State(index): State<GuardedIndexManager>,
    Path(retrieval_id): Path<String>,
) -> Response {
    match index.remove(&retrieval_id) {
        Ok(RemoveOutcome::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => index_error_response(e),
    }
}

pub async fn post_verify(State(index): State<GuardedIndexManager>) -> Response {
    let report = tokio::task::spawn_blocking(move || index.verify_integrity()).await;
    match report {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!("Integrity sweep task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// An empty body runs with the default options.
pub async fn post_cleanup(State(index): State<GuardedIndexManager>, body: Bytes) -> Response {
    let options = if body.iter().all(u8::is_ascii_whitespace) {
        CleanupOptions::default()
    } else {
        match serde_json::from_slice::<CleanupOptions>(&body) {
            Ok(options) => options,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid cleanup options: {}", e),
                )
            }
        }
    };

    let result = tokio::task::spawn_blocking(move || index.cleanup(&options)).await;
    match result {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            error!("Cleanup task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_export(State(index): State<GuardedIndexManager>) -> Response {
    match index.export_index() {
        Ok(blob) => Json(blob).into_response(),
        Err(e) => index_error_response(e),
    }
}

pub async fn post_import(
    State(index): State<GuardedIndexManager>,
    Json(blob): Json<JsonValue>,
) -> Response {
    match index.import_index(blob) {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => index_error_response(e),
    }
}
