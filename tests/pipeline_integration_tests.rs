//! End-to-end exercise of the feed pipeline against a mocked HTTP
//! origin: cache miss → fetch/parse → enrichment → cache hit on the
//! second call, plus the partial-failure and pagination scenarios
//! named in §8.

use std::sync::Arc;
use std::time::Duration;

use digests_api::config::Config;
use digests_api::domain::color::ColorExtractor;
use digests_api::domain::metadata::MetadataExtractor;
use digests_api::domain::models::ParseFeedsOptions;
use digests_api::domain::pipeline::Dependencies;
use digests_api::infrastructure::cache::memory::MemoryCache;
use digests_api::infrastructure::http_client::FetchClient;
use digests_api::infrastructure::worker_pool::WorkerPool;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SAMPLE_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Mocked Feed</title>
    <link>https://example.com</link>
    <item>
        <title>First Post</title>
        <link>https://example.com/1</link>
        <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
        <enclosure url="https://img.invalid/1.jpg" type="image/jpeg" length="100"/>
    </item>
    <item>
        <title>Second Post</title>
        <link>https://example.com/2</link>
        <pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate>
        <enclosure url="https://img.invalid/2.jpg" type="image/jpeg" length="100"/>
    </item>
</channel></rss>"#;

async fn build_deps() -> Arc<Dependencies> {
    let cache: Arc<dyn digests_api::infrastructure::cache::Cache> = Arc::new(MemoryCache::new());
    let http_client = Arc::new(FetchClient::new().unwrap());
    let metadata = Arc::new(MetadataExtractor::new(http_client.clone()));
    let color = Arc::new(ColorExtractor::new(7));
    let enrichment = Arc::new(WorkerPool::new(
        2,
        16,
        cache.clone(),
        color.clone(),
        metadata.clone(),
    ));
    enrichment.start().await;

    Arc::new(Dependencies {
        cache,
        http_client,
        metadata,
        color,
        enrichment,
        refresh_timer: Duration::from_secs(3600),
        item_fanout_limit: 4,
    })
}

#[tokio::test]
async fn cache_miss_then_hit_on_second_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_RSS))
        .expect(1)
        .mount(&server)
        .await;

    let deps = build_deps().await;
    let url = format!("{}/rss.xml", server.uri());

    let first = digests_api::parse_feed(deps.clone(), &url, ParseFeedsOptions::default())
        .await
        .unwrap();
    assert_eq!(first.title, "Mocked Feed");
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].title, "Second Post", "newest published first");

    // Second call must come from the cache; the mock only expects one hit.
    let second = digests_api::parse_feed(deps, &url, ParseFeedsOptions::default())
        .await
        .unwrap();
    assert_eq!(second.items.len(), 2);
}

#[tokio::test]
async fn partial_failure_does_not_cancel_sibling_urls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/good.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_RSS))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let deps = build_deps().await;
    let urls = vec![
        format!("{}/good.xml", server.uri()),
        format!("{}/missing.xml", server.uri()),
    ];

    let response = digests_api::parse_feeds(deps, &urls, ParseFeedsOptions::default(), 4).await;
    assert_eq!(response.feeds.len(), 2);

    let ok_count = response
        .feeds
        .iter()
        .filter(|f| matches!(f, digests_api::domain::models::FeedSlot::Ok { .. }))
        .count();
    let error_count = response.feeds.len() - ok_count;
    assert_eq!(ok_count, 1);
    assert_eq!(error_count, 1);
    assert_eq!(response.metadata.errors.len(), 1);
}

#[tokio::test]
async fn pagination_slices_items_by_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_RSS))
        .mount(&server)
        .await;

    let deps = build_deps().await;
    let url = format!("{}/rss.xml", server.uri());

    let opts = ParseFeedsOptions {
        page: 2,
        items_per_page: 1,
        enrich_metadata: false,
        enrich_colors: false,
    };
    let feed = digests_api::parse_feed(deps, &url, opts).await.unwrap();
    assert_eq!(feed.items.len(), 1);
    assert_eq!(feed.items[0].title, "First Post");
}

#[tokio::test]
async fn disabled_enrichment_skips_color_lookup_and_site_favicon() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_RSS))
        .mount(&server)
        .await;

    let deps = build_deps().await;
    let url = format!("{}/rss.xml", server.uri());

    let opts = ParseFeedsOptions {
        page: 1,
        items_per_page: 50,
        enrich_metadata: false,
        enrich_colors: false,
    };
    let feed = digests_api::parse_feed(deps, &url, opts).await.unwrap();
    assert!(feed
        .items
        .iter()
        .all(|i| i.thumbnail_color_state == digests_api::domain::models::ThumbnailColorState::Absent));
    assert!(feed.favicon.is_none());
}

#[tokio::test]
async fn config_from_env_defaults_to_memory_cache() {
    std::env::remove_var("CACHE_TYPE");
    let config = Config::from_env().unwrap();
    assert!(matches!(
        config.cache_type,
        digests_api::config::CacheType::Memory
    ));
}
