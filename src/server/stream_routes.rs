//! Playback endpoints: hybrid track streaming, the forced-remote locator,
//! the explicit URL proxy and the playback source probe.

use super::state::{GuardedIndexManager, GuardedStreamDelivery};
use crate::streaming::HEADER_BYTE_RANGE;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct ProxyQuery {
    pub url: String,
}

fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(HEADER_BYTE_RANGE)
        .and_then(|value| value.to_str().ok())
}

pub async fn stream_track(
    State(delivery): State<GuardedStreamDelivery>,
    Path(track_id): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let head_only = method == Method::HEAD;
    delivery
        .deliver_track(&track_id, range_header(&headers), head_only)
        .await
        .into_response()
}

pub async fn stream_remote_track(
    State(delivery): State<GuardedStreamDelivery>,
    Path(track_id): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let head_only = method == Method::HEAD;
    delivery
        .deliver_remote_track(&track_id, range_header(&headers), head_only)
        .await
        .into_response()
}

pub async fn proxy_url(
    State(delivery): State<GuardedStreamDelivery>,
    Query(query): Query<ProxyQuery>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let head_only = method == Method::HEAD;
    delivery
        .deliver_url(&query.url, range_header(&headers), head_only)
        .await
        .into_response()
}

pub async fn get_playback_source(
    State(index): State<GuardedIndexManager>,
    Path(track_id): Path<String>,
) -> Response {
    Json(index.resolve_playback_source(&track_id)).into_response()
}
