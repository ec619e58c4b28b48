//! Router-level exercise of the HTTP adapter: status codes, JSON
//! shapes, and the rate-limit headers/refusal, independent of the
//! pipeline-level tests in `pipeline_integration_tests.rs`.

use std::sync::Arc;
use std::time::Duration;

use axum_test::{TestServer, TestServerConfig};
use digests_api::domain::color::ColorExtractor;
use digests_api::domain::metadata::MetadataExtractor;
use digests_api::domain::pipeline::{Dependencies, FeedPipeline};
use digests_api::infrastructure::cache::memory::MemoryCache;
use digests_api::infrastructure::cache::Cache;
use digests_api::infrastructure::http_client::FetchClient;
use digests_api::infrastructure::worker_pool::WorkerPool;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SAMPLE_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>API Feed</title>
    <link>https://example.com</link>
    <item>
        <title>Only Post</title>
        <link>https://example.com/1</link>
        <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
        <enclosure url="https://img.invalid/1.jpg" type="image/jpeg" length="100"/>
    </item>
</channel></rss>"#;

async fn build_server(rate_limit: u32) -> TestServer {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let http_client = Arc::new(FetchClient::new().unwrap());
    let metadata = Arc::new(MetadataExtractor::new(http_client.clone()));
    let color = Arc::new(ColorExtractor::new(7));
    let enrichment = Arc::new(WorkerPool::new(2, 16, cache.clone(), color.clone(), metadata.clone()));
    enrichment.start().await;

    let deps = Arc::new(Dependencies {
        cache,
        http_client,
        metadata,
        color,
        enrichment,
        refresh_timer: Duration::from_secs(3600),
        item_fanout_limit: 4,
    });
    let pipeline = Arc::new(FeedPipeline::new(deps, 4));
    let app = digests_api::build_router(pipeline, rate_limit, Duration::from_secs(60));

    // Real socket transport, not the in-process mock, because the
    // rate-limit middleware extracts `ConnectInfo<SocketAddr>`.
    let config = TestServerConfig {
        transport: Some(axum_test::Transport::HttpRandomPort),
        ..TestServerConfig::default()
    };
    TestServer::new_with_config(app, config).unwrap()
}

#[tokio::test]
async fn health_check_returns_ok() {
    let server = build_server(120).await;
    let response = server.get("/health").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn create_feeds_rejects_empty_url_list() {
    let server = build_server(120).await;
    let response = server.post("/feeds").json(&serde_json::json!({ "urls": [] })).await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn get_feed_returns_parsed_feed_json() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_RSS))
        .mount(&mock)
        .await;

    let server = build_server(120).await;
    let url = format!("{}/rss.xml", mock.uri());
    let response = server.get("/feed").add_query_param("url", &url).await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["title"], "API Feed");
    assert_eq!(body["items"][0]["title"], "Only Post");
}

#[tokio::test]
async fn exceeding_rate_limit_returns_429_with_retry_after() {
    let server = build_server(1).await;
    let first = server.get("/health").await;
    first.assert_status_ok();

    let second = server.get("/health").await;
    second.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));
}
