//! End-to-end tests for the explicit upstream URL proxy

mod common;

use common::*;
use reqwest::StatusCode;

#[tokio::test]
async fn test_proxy_allowed_url() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .proxy(&server.upstream.media_url("song.webm"), None)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], UPSTREAM_CONTENT_TYPE);
    assert_eq!(
        response.headers()["content-length"],
        UPSTREAM_MEDIA_SIZE.to_string()
    );
    assert_eq!(
        response.bytes().await.unwrap().as_ref(),
        upstream_bytes().as_slice()
    );
}

#[tokio::test]
async fn test_proxy_forwards_open_ended_range() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .proxy(&server.upstream.media_url("song.webm"), Some("bytes=8000-"))
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()["content-range"],
        format!("bytes 8000-{}/{}", UPSTREAM_MEDIA_SIZE - 1, UPSTREAM_MEDIA_SIZE)
    );
    assert_eq!(
        response.bytes().await.unwrap().as_ref(),
        &upstream_bytes()[8000..]
    );
}

#[tokio::test]
async fn test_proxy_rejects_host_outside_allow_list() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .proxy("https://evil.example.com/videoplayback?expire=9999999999", None)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_proxy_rejects_redirect_to_disallowed_host() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .proxy(&server.upstream.offsite_redirect_url("song.webm"), None)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get("retry-after").is_none());
    let body = response.text().await.unwrap();
    assert!(body.contains("media.evil.invalid"));
    assert!(!body.contains("expire="));
}

#[tokio::test]
async fn test_proxy_rejects_unsupported_scheme() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .proxy("ftp://127.0.0.1/media/song.webm?expire=9999999999", None)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_proxy_rejects_malformed_url() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.proxy("not a url", None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_proxy_rejects_expired_url() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .proxy(&server.upstream.expired_media_url("song.webm"), None)
        .await;

    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn test_proxy_url_without_expiry_is_treated_as_expired() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let url = format!("{}/media/song.webm", server.upstream.base_url);
    let response = client.proxy(&url, None).await;

    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn test_proxy_missing_url_parameter() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .client
        .get(format!("{}/v1/proxy", server.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_proxy_head() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .head_proxy(&server.upstream.media_url("song.webm"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-length"],
        UPSTREAM_MEDIA_SIZE.to_string()
    );
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_proxy_cors_preflight() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .client
        .request(
            reqwest::Method::OPTIONS,
            format!("{}/v1/proxy", server.base_url),
        )
        .header("Origin", "http://player.local")
        .header("Access-Control-Request-Method", "GET")
        .header("Access-Control-Request-Headers", "range")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}
