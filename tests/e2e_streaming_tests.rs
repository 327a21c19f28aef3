//! End-to-end tests for hybrid track playback
//!
//! Local copies are served from the storage root, everything else is
//! proxied from the mock upstream the extractor points at.

mod common;

use common::*;
use reqwest::StatusCode;
use serde_json::Value;

async fn ingest_local(server: &TestServer, client: &TestClient, track_id: &str, size: usize) -> Vec<u8> {
    let name = format!("{}.mp3", track_id);
    let path = write_media_file(server.storage_root(), &name, size);
    let response = client
        .ingest(&ingest_body(&format!("r-{}", track_id), track_id, &path, &["calm"]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "added");
    std::fs::read(&path).unwrap()
}

#[tokio::test]
async fn test_local_track_full_content() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let expected = ingest_local(&server, &client, "local-1", 3000).await;

    let response = client.stream("local-1", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers["content-type"], "audio/mpeg");
    assert_eq!(headers["accept-ranges"], "bytes");
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(headers["content-length"], "3000");
    assert_eq!(response.bytes().await.unwrap().as_ref(), expected.as_slice());
}

#[tokio::test]
async fn test_local_track_byte_range() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let expected = ingest_local(&server, &client, "local-1", 3000).await;

    let response = client.stream("local-1", Some("bytes=1000-1999")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-range"], "bytes 1000-1999/3000");
    assert_eq!(response.headers()["content-length"], "1000");
    assert_eq!(
        response.bytes().await.unwrap().as_ref(),
        &expected[1000..2000]
    );
}

#[tokio::test]
async fn test_local_track_suffix_range() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let expected = ingest_local(&server, &client, "local-1", 3000).await;

    let response = client.stream("local-1", Some("bytes=-100")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-range"], "bytes 2900-2999/3000");
    assert_eq!(response.bytes().await.unwrap().as_ref(), &expected[2900..]);
}

#[tokio::test]
async fn test_local_track_head_has_no_body() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    ingest_local(&server, &client, "local-1", 3000).await;

    let response = client.head_stream("local-1", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-length"], "3000");
    assert_eq!(response.headers()["content-type"], "audio/mpeg");
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_track_without_local_copy_is_proxied() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.stream(REMOTE_TRACK_ID, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], UPSTREAM_CONTENT_TYPE);
    assert_eq!(response.headers()["accept-ranges"], "bytes");
    assert_eq!(
        response.bytes().await.unwrap().as_ref(),
        upstream_bytes().as_slice()
    );
}

#[tokio::test]
async fn test_remote_range_is_forwarded() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .stream_remote(REMOTE_TRACK_ID, Some("bytes=100-199"))
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()["content-range"],
        format!("bytes 100-199/{}", UPSTREAM_MEDIA_SIZE)
    );
    assert_eq!(
        response.bytes().await.unwrap().as_ref(),
        &upstream_bytes()[100..200]
    );
}

#[tokio::test]
async fn test_unsatisfiable_upstream_range_falls_back_to_full_content() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let range = format!("bytes={}-", UPSTREAM_MEDIA_SIZE * 2);
    let response = client.stream_remote(REMOTE_TRACK_ID, Some(&range)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.bytes().await.unwrap().len(),
        UPSTREAM_MEDIA_SIZE
    );
}

#[tokio::test]
async fn test_remote_forced_even_with_local_copy() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    ingest_local(&server, &client, REMOTE_TRACK_ID, 500).await;

    let local = client.stream(REMOTE_TRACK_ID, None).await;
    assert_eq!(local.headers()["content-type"], "audio/mpeg");

    let remote = client.stream_remote(REMOTE_TRACK_ID, None).await;
    assert_eq!(remote.status(), StatusCode::OK);
    assert_eq!(remote.headers()["content-type"], UPSTREAM_CONTENT_TYPE);
    assert_eq!(remote.bytes().await.unwrap().len(), UPSTREAM_MEDIA_SIZE);
}

#[tokio::test]
async fn test_deleted_local_copy_falls_back_to_remote() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    ingest_local(&server, &client, REMOTE_TRACK_ID, 500).await;

    let source: Value = client
        .playback_source(REMOTE_TRACK_ID)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(source["kind"], "local");
    assert_eq!(source["format"], "mp3");

    std::fs::remove_file(server.storage_root().join(format!("{}.mp3", REMOTE_TRACK_ID))).unwrap();

    let response = client.stream(REMOTE_TRACK_ID, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], UPSTREAM_CONTENT_TYPE);
    assert_eq!(response.bytes().await.unwrap().len(), UPSTREAM_MEDIA_SIZE);

    let source: Value = client
        .playback_source(REMOTE_TRACK_ID)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(source["kind"], "remote");
    assert_eq!(
        source["locator"],
        format!("/v1/stream/{}/remote", REMOTE_TRACK_ID)
    );

    let stats: Value = client.library_stats().await.json().await.unwrap();
    assert_eq!(stats["entries"], 1);
    assert_eq!(stats["unavailable"], 1);
}

#[tokio::test]
async fn test_expired_upstream_url_is_gone() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.stream(EXPIRED_TRACK_ID, None).await;

    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_upstream_error_is_bad_gateway() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.stream(BROKEN_TRACK_ID, None).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_unknown_track_is_not_found() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.stream(UNKNOWN_TRACK_ID, None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_head_probe_falls_back_to_ranged_get() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.head_stream(NO_HEAD_TRACK_ID, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-length"],
        UPSTREAM_MEDIA_SIZE.to_string()
    );
    assert_eq!(response.headers()["content-type"], UPSTREAM_CONTENT_TYPE);
}

#[tokio::test]
async fn test_head_probe_with_range_reports_partial() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .head_stream(NO_HEAD_TRACK_ID, Some("bytes=0-1023"))
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-length"], "1024");
    assert_eq!(
        response.headers()["content-range"],
        format!("bytes 0-1023/{}", UPSTREAM_MEDIA_SIZE)
    );
}
