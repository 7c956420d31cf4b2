//! End-to-end tests: CachedFetcher + ResilientClient + HttpTransport against a local
//! mock proxy

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use httpmock::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;

use lmsfetch::cache::{CachePolicy, CacheStore};
use lmsfetch::client::{
    ApiRequest, ClientConfig, HttpTransport, NoAuth, RawResponse, ResilientClient, StaticToken,
    TokenProvider, Transport, TransportError,
};
use lmsfetch::failure::{AuthFailure, FailureKind, GeneralFailure, NetworkFailure};
use lmsfetch::{CachedFetcher, Source};

const HOUR: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Course {
    id: u32,
    name: String,
}

fn config(base_url: String) -> ClientConfig {
    ClientConfig::new(base_url)
        .with_max_retries(0)
        .with_base_delay(Duration::from_millis(10))
}

fn fetcher(config: &ClientConfig, tokens: Arc<dyn TokenProvider>) -> (CachedFetcher, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let cache = CacheStore::with_dir(temp_dir.path());
    let client = ResilientClient::new(config, tokens).expect("client should build");
    (CachedFetcher::new(Arc::new(cache), Arc::new(client)), temp_dir)
}

#[tokio::test]
async fn test_cache_first_hits_proxy_once_and_keeps_etag() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/courses")
                .header("authorization", "Bearer secret");
            then.status(200)
                .header("content-type", "application/json")
                .header("etag", "\"v1\"")
                .json_body(json!({
                    "success": true,
                    "data": [{ "id": 1, "name": "Algebra" }]
                }));
        })
        .await;
    let (fetcher, _temp_dir) = fetcher(
        &config(server.url("/api")),
        Arc::new(StaticToken("secret".to_string())),
    );
    let policy = CachePolicy::cache_first(HOUR);

    let first = fetcher
        .fetch_resource::<Vec<Course>>("courses", &policy, ApiRequest::get("courses"), false)
        .await
        .unwrap();
    let second = fetcher
        .fetch_resource::<Vec<Course>>("courses", &policy, ApiRequest::get("courses"), false)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(first.source, Source::Network);
    assert_eq!(second.source, Source::Cache);
    assert_eq!(
        second.value,
        vec![Course {
            id: 1,
            name: "Algebra".to_string()
        }]
    );
    assert_eq!(
        fetcher.cache().etag("courses").await.unwrap().as_deref(),
        Some("\"v1\"")
    );
}

#[tokio::test]
async fn test_not_found_is_requested_once() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/courses/404");
            then.status(404);
        })
        .await;
    let client_config = config(server.url("/api")).with_max_retries(2);
    let (fetcher, _temp_dir) = fetcher(&client_config, Arc::new(NoAuth));

    let result = fetcher
        .fetch_resource::<Course>(
            "courses/404",
            &CachePolicy::network_only(),
            ApiRequest::get("courses/404"),
            false,
        )
        .await;

    mock.assert_async().await;
    assert_eq!(
        result.unwrap_err().kind,
        FailureKind::Network(NetworkFailure::ClientError(404))
    );
}

#[tokio::test]
async fn test_unauthorized_maps_to_invalid_token() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/profile");
            then.status(401)
                .json_body(json!({ "success": false, "error": "token expired" }));
        })
        .await;
    let (fetcher, _temp_dir) = fetcher(&config(server.url("/api")), Arc::new(NoAuth));

    let failure = fetcher
        .fetch_resource::<serde_json::Value>(
            "profile",
            &CachePolicy::network_only(),
            ApiRequest::get("profile"),
            false,
        )
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Auth(AuthFailure::InvalidToken));
    assert_eq!(failure.message, "token expired");
    assert!(failure.is_terminal());
}

#[tokio::test]
async fn test_network_first_falls_back_to_stale_cache_on_server_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/assignments");
            then.status(503);
        })
        .await;
    let (fetcher, _temp_dir) = fetcher(&config(server.url("/api")), Arc::new(NoAuth));
    let cached = vec![Course {
        id: 9,
        name: "Cached".to_string(),
    }];
    fetcher
        .cache()
        .put("assignments", &cached, Duration::ZERO, None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let policy = CachePolicy::network_first(HOUR).with_allow_stale(true);
    let fetched = fetcher
        .fetch_resource::<Vec<Course>>("assignments", &policy, ApiRequest::get("assignments"), false)
        .await
        .unwrap();

    assert_eq!(fetched.source, Source::StaleCache);
    assert_eq!(fetched.value, cached);

    let strict = CachePolicy::network_first(HOUR);
    let failure = fetcher
        .fetch_resource::<Vec<Course>>("assignments", &strict, ApiRequest::get("assignments"), false)
        .await
        .unwrap_err();
    assert_eq!(
        failure.kind,
        FailureKind::Network(NetworkFailure::ServerError(503))
    );
}

#[tokio::test]
async fn test_envelope_failure_becomes_unknown() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/calendar").query_param("from", "2024-09-01");
            then.status(200)
                .json_body(json!({ "success": false, "error": "calendar unavailable" }));
        })
        .await;
    let (fetcher, _temp_dir) = fetcher(&config(server.url("/api")), Arc::new(NoAuth));

    let failure = fetcher
        .fetch_resource::<serde_json::Value>(
            "calendar",
            &CachePolicy::network_only(),
            ApiRequest::get("calendar").with_query("from", "2024-09-01"),
            false,
        )
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::General(GeneralFailure::Unknown));
    assert_eq!(failure.message, "calendar unavailable");
}

#[tokio::test]
async fn test_slow_proxy_times_out() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/slow");
            then.status(200)
                .delay(Duration::from_millis(1500))
                .json_body(json!({ "success": true, "data": null }));
        })
        .await;
    let client_config = config(server.url("/api")).with_timeouts(
        Duration::from_secs(1),
        Duration::from_millis(100),
        Duration::from_millis(100),
    );
    let (fetcher, _temp_dir) = fetcher(&client_config, Arc::new(NoAuth));

    let failure = fetcher
        .fetch_resource::<serde_json::Value>(
            "slow",
            &CachePolicy::network_only(),
            ApiRequest::get("slow"),
            false,
        )
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Network(NetworkFailure::Timeout));
    assert!(failure.is_retryable());
}

#[tokio::test]
async fn test_unreachable_proxy_is_no_connection() {
    let (fetcher, _temp_dir) = fetcher(&config("http://127.0.0.1:1/api".to_string()), Arc::new(NoAuth));

    let failure = fetcher
        .fetch_resource::<serde_json::Value>(
            "courses",
            &CachePolicy::cache_first(HOUR),
            ApiRequest::get("courses"),
            false,
        )
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Network(NetworkFailure::NoConnection));
    assert!(!fetcher.cache().contains("courses").await.unwrap());
}

/// Real HTTP transport that counts how often it is asked to send
struct CountingTransport {
    inner: HttpTransport,
    attempts: AtomicUsize,
}

#[async_trait]
impl Transport for CountingTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.send(request).await
    }
}

#[tokio::test]
async fn test_refused_connect_with_tls_words_in_path_is_retried() {
    let config = ClientConfig::new("http://127.0.0.1:1/api")
        .with_max_retries(2)
        .with_base_delay(Duration::from_millis(10));
    let transport = Arc::new(CountingTransport {
        inner: HttpTransport::new(&config).unwrap(),
        attempts: AtomicUsize::new(0),
    });
    let client = ResilientClient::with_transport(transport.clone(), Arc::new(NoAuth), &config);

    let failure = client
        .execute(ApiRequest::get("courses/ssl-basics"))
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Network(NetworkFailure::NoConnection));
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
}
