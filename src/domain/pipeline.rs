//! Feed pipeline (C8): the request-facing orchestrator. Fans out over
//! the requested URLs bounded by a semaphore, resolving each through a
//! cache-hit/stale/miss decision tree, enriching items with
//! thumbnails and (asynchronously) colors, merging against any
//! previously cached items, and paginating the result.
//!
//! Refresh is driven per-request rather than by a cron-style tick:
//! the per-URL task shape fans out under a `tokio::sync::Semaphore`
//! bound sized to the configured worker count, and item-level work
//! within a single URL fans out under its own, separately sized bound.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;

use super::color::ColorExtractor;
use super::errors::PipelineError;
use super::merger;
use super::metadata::MetadataExtractor;
use super::models::{
    sha256_hex, Feed, FeedItem, FeedSlot, FeedType, ParseFeedsMetadata, ParseFeedsOptions,
    ParseFeedsResponse,
};
use super::thumbnail;
use crate::infrastructure::cache::{ns, Cache, CacheExt};
use crate::infrastructure::feed_parser;
use crate::infrastructure::http_client::FetchClient;
use crate::infrastructure::worker_pool::{Job, WorkerPool};

const FEED_TTL: Duration = Duration::from_secs(24 * 3600);

/// Shared handles every pipeline request needs (§9 design note). Built
/// once at startup and cloned cheaply per request via `Arc`.
pub struct Dependencies {
    pub cache: Arc<dyn Cache>,
    pub http_client: Arc<FetchClient>,
    pub metadata: Arc<MetadataExtractor>,
    pub color: Arc<ColorExtractor>,
    pub enrichment: Arc<WorkerPool>,
    pub refresh_timer: Duration,
    /// Bound on concurrent item-level enrichment (thumbnail + color)
    /// within a single URL, distinct from the per-URL fan-out above.
    pub item_fanout_limit: usize,
}

pub struct FeedPipeline {
    deps: Arc<Dependencies>,
    fanout_limit: usize,
}

impl FeedPipeline {
    pub fn new(deps: Arc<Dependencies>, fanout_limit: usize) -> Self {
        Self {
            deps,
            fanout_limit: fanout_limit.max(1),
        }
    }

    pub async fn parse_feeds(
        &self,
        urls: &[String],
        opts: ParseFeedsOptions,
    ) -> ParseFeedsResponse {
        let opts = opts.normalized();
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.fanout_limit));

        let mut handles = Vec::with_capacity(urls.len());
        for raw_url in urls {
            let url = canonicalize(raw_url);
            let deps = self.deps.clone();
            let semaphore = semaphore.clone();
            let opts = opts.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                process_url(&deps, url, &opts).await
            }));
        }

        let mut feeds = Vec::with_capacity(handles.len());
        let mut metadata = ParseFeedsMetadata::default();
        for handle in handles {
            match handle.await {
                Ok(outcome) => {
                    metadata.total_items += outcome.item_count;
                    if outcome.cache_hit {
                        metadata.cache_hits += 1;
                    } else {
                        metadata.cache_misses += 1;
                    }
                    metadata.enriched_items += outcome.enriched_items;
                    if let FeedSlot::Error { error, .. } = &outcome.slot {
                        metadata.errors.push(error.clone());
                    }
                    feeds.push(outcome.slot);
                }
                Err(join_err) => {
                    metadata.errors.push(format!("task panicked: {join_err}"));
                }
            }
        }

        metadata.parse_time_ms = started.elapsed().as_millis();
        ParseFeedsResponse { feeds, metadata }
    }
}

struct UrlOutcome {
    slot: FeedSlot,
    cache_hit: bool,
    item_count: usize,
    enriched_items: usize,
}

/// Strips whitespace, defaults to `https://` when no scheme is present,
/// and upgrades bare `http://` to `https://`.
fn canonicalize(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("https://") {
        trimmed.to_string()
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("https://{rest}")
    } else if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

fn is_stale(last_refreshed: chrono::DateTime<Utc>, refresh_timer: Duration) -> bool {
    let age = Utc::now() - last_refreshed;
    age.to_std().unwrap_or(Duration::ZERO) > refresh_timer
}

async fn process_url(deps: &Arc<Dependencies>, url: String, opts: &ParseFeedsOptions) -> UrlOutcome {
    let cache_key = url.clone();

    let cached: Option<Feed> = deps
        .cache
        .get_json(ns::FEED, &cache_key)
        .await
        .ok()
        .flatten();

    if let Some(mut feed) = cached.filter(|f| !f.title.is_empty()) {
        update_thumbnail_colors(deps, &mut feed.items).await;

        if is_stale(feed.last_refreshed, deps.refresh_timer) {
            let deps = deps.clone();
            let url = url.clone();
            // Runs independent of this request's enrichment flags so the
            // cache stays fully enriched for whichever caller reads it next.
            let refresh_opts = ParseFeedsOptions::default();
            tokio::spawn(async move {
                if let Err(e) = fetch_and_cache(&deps, &url, &refresh_opts).await {
                    tracing::warn!(url, error = %e, "background refresh failed");
                }
            });
        }

        let item_count = feed.items.len();
        let page = paginate(feed.items.clone(), opts);
        feed.items = page;
        return UrlOutcome {
            slot: FeedSlot::Ok { feed },
            cache_hit: true,
            item_count,
            enriched_items: 0,
        };
    }

    match fetch_and_cache(deps, &url, opts).await {
        Ok(mut feed) => {
            let item_count = feed.items.len();
            let enriched = feed
                .items
                .iter()
                .filter(|i| i.thumbnail_color_state != super::models::ThumbnailColorState::Absent)
                .count();
            feed.items = paginate(feed.items, opts);
            UrlOutcome {
                slot: FeedSlot::Ok { feed },
                cache_hit: false,
                item_count,
                enriched_items: enriched,
            }
        }
        Err(err) => UrlOutcome {
            slot: FeedSlot::Error {
                feed_type: FeedType::Unknown,
                feed_url: url.clone(),
                guid: sha256_hex(&url),
                error: err.to_string(),
            },
            cache_hit: false,
            item_count: 0,
            enriched_items: 0,
        },
    }
}

fn paginate(items: Vec<FeedItem>, opts: &ParseFeedsOptions) -> Vec<FeedItem> {
    let start = (opts.page - 1) * opts.items_per_page;
    if start >= items.len() {
        return Vec::new();
    }
    let end = (start + opts.items_per_page).min(items.len());
    items[start..end].to_vec()
}

async fn update_thumbnail_colors(deps: &Arc<Dependencies>, items: &mut [FeedItem]) {
    for item in items.iter_mut() {
        if item.thumbnail_color_state == super::models::ThumbnailColorState::Computed {
            continue;
        }
        if item.thumbnail.is_empty() {
            continue;
        }
        if let Some(color) = deps
            .cache
            .get_json(ns::THUMBNAIL_COLOR, &item.thumbnail)
            .await
            .ok()
            .flatten()
        {
            item.thumbnail_color = Some(color);
            item.thumbnail_color_state = super::models::ThumbnailColorState::Computed;
        }
    }
}

/// Resolves each item's thumbnail and, if requested, its dominant color,
/// fanned out under a semaphore bound distinct from the per-URL one in
/// `parse_feeds` so one feed's many items don't serialize behind each
/// other's page fetches.
async fn enrich_items(
    deps: &Arc<Dependencies>,
    items: Vec<FeedItem>,
    feed_image: Option<&str>,
    opts: &ParseFeedsOptions,
) -> Vec<FeedItem> {
    let semaphore = Arc::new(Semaphore::new(deps.item_fanout_limit.max(1)));
    let feed_image = feed_image.map(|s| s.to_string());
    let enrich_colors = opts.enrich_colors;

    let mut handles = Vec::with_capacity(items.len());
    for mut item in items {
        let deps = deps.clone();
        let semaphore = semaphore.clone();
        let feed_image = feed_image.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            item.thumbnail = thumbnail::find(
                &item,
                feed_image.as_deref(),
                deps.metadata.as_ref(),
                deps.cache.as_ref(),
            )
            .await;

            if enrich_colors && !item.thumbnail.is_empty() {
                if let Some(color) = deps
                    .cache
                    .get_json(ns::THUMBNAIL_COLOR, &item.thumbnail)
                    .await
                    .ok()
                    .flatten()
                {
                    item.thumbnail_color = Some(color);
                    item.thumbnail_color_state = super::models::ThumbnailColorState::Computed;
                } else {
                    item.thumbnail_color_state = super::models::ThumbnailColorState::Scheduled;
                    let _ = deps
                        .enrichment
                        .submit(Job::ColorBatch {
                            urls: vec![item.thumbnail.clone()],
                            sink: None,
                        })
                        .await;
                }
            }
            item
        }));
    }

    let mut items = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(item) => items.push(item),
            Err(join_err) => tracing::warn!(error = %join_err, "item enrichment task panicked"),
        }
    }
    items
}

/// Fetches, parses, enriches, merges, and caches one feed. The critical
/// per-URL path behind both a cold miss and a background stale-refresh.
async fn fetch_and_cache(
    deps: &Arc<Dependencies>,
    url: &str,
    opts: &ParseFeedsOptions,
) -> Result<Feed, PipelineError> {
    let existing: Option<Feed> = deps.cache.get_json(ns::FEED, url).await?;

    let mut headers = Vec::new();
    if let Some(existing) = &existing {
        if let Some(etag) = &existing.etag {
            headers.push(("If-None-Match", etag.as_str()));
        }
        if let Some(last_modified) = &existing.last_modified_header {
            headers.push(("If-Modified-Since", last_modified.as_str()));
        }
    }

    let response = deps.http_client.get_with_headers(url, &headers).await?;

    if response.status() == reqwest::StatusCode::NOT_MODIFIED {
        let mut feed = existing.ok_or_else(|| {
            PipelineError::Internal("304 response with no cached feed to refresh".to_string())
        })?;
        feed.last_refreshed = Utc::now();
        deps.cache.set_json(ns::FEED, url, &feed, FEED_TTL).await?;
        return Ok(feed);
    }

    let etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let last_modified_header = response
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let body = response
        .bytes()
        .await
        .map_err(|e| PipelineError::Network(e.to_string()))?;

    let parsed = feed_parser::parse(&body).map_err(|e| PipelineError::Parsing {
        url: url.to_string(),
        cause: e.to_string(),
    })?;

    let mut site_favicon = None;
    if opts.enrich_metadata {
        if let Some(link) = &parsed.link {
            if let Ok(page_meta) = deps.metadata.extract(deps.cache.as_ref(), link).await {
                site_favicon = page_meta.favicon;
            }
        }
    }

    let items = enrich_items(deps, parsed.items, parsed.image.as_deref(), opts).await;

    let existing_items = existing.as_ref().map(|f| f.items.clone()).unwrap_or_default();
    let mut merged = merger::merge(existing_items, items);
    Feed::sort_items(&mut merged);

    let now = Utc::now();
    let feed = Feed {
        id: Feed::id_from_url(url),
        title: parsed.title,
        description: parsed.description,
        link: parsed.link,
        language: parsed.language,
        favicon: site_favicon.or_else(|| existing.as_ref().and_then(|f| f.favicon.clone())),
        feed_type: parsed.feed_type,
        url: url.to_string(),
        last_updated: now,
        last_refreshed: now,
        etag,
        last_modified_header,
        items: merged,
    };

    deps.cache.set_json(ns::FEED, url, &feed, FEED_TTL).await?;
    Ok(feed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_defaults_to_https() {
        assert_eq!(canonicalize("example.com/feed"), "https://example.com/feed");
    }

    #[test]
    fn canonicalize_upgrades_http() {
        assert_eq!(
            canonicalize("http://example.com/feed"),
            "https://example.com/feed"
        );
    }

    #[test]
    fn canonicalize_trims_whitespace() {
        assert_eq!(
            canonicalize("  https://example.com/feed  "),
            "https://example.com/feed"
        );
    }

    #[test]
    fn canonicalize_preserves_other_schemes() {
        assert_eq!(canonicalize("feed://example.com"), "feed://example.com");
    }

    fn item(id: &str) -> FeedItem {
        FeedItem {
            id: id.to_string(),
            title: id.to_string(),
            link: format!("https://x/{id}"),
            ..Default::default()
        }
    }

    #[test]
    fn paginate_returns_empty_past_end() {
        let items = vec![item("a"), item("b")];
        let opts = ParseFeedsOptions {
            page: 5,
            items_per_page: 10,
            enrich_metadata: true,
            enrich_colors: true,
        };
        assert!(paginate(items, &opts).is_empty());
    }

    #[test]
    fn paginate_slices_by_page() {
        let items = vec![item("a"), item("b"), item("c")];
        let opts = ParseFeedsOptions {
            page: 2,
            items_per_page: 2,
            enrich_metadata: true,
            enrich_colors: true,
        };
        let page = paginate(items, &opts);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "c");
    }

    #[test]
    fn staleness_compares_against_refresh_timer() {
        let fresh = Utc::now();
        assert!(!is_stale(fresh, Duration::from_secs(3600)));
        let stale = Utc::now() - chrono::Duration::hours(2);
        assert!(is_stale(stale, Duration::from_secs(3600)));
    }
}
