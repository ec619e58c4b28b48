//! Metadata extractor (C6): Open Graph + JSON-LD + favicon discovery
//! for a single page, cached per base domain. Built on `scraper` so
//! JSON-LD blocks and favicon `<link rel>` discovery can share one
//! parse pass with the OG tags.

use std::sync::Arc;
use std::time::Duration;

use scraper::{Html, Selector};
use url::Url;

use crate::domain::models::PageMetadata;
use crate::domain::models::sha256_hex;
use crate::infrastructure::cache::{ns, Cache, CacheExt};
use crate::infrastructure::http_client::FetchClient;

const METADATA_TTL: Duration = Duration::from_secs(24 * 3600);

pub struct MetadataExtractor {
    http: Arc<FetchClient>,
}

impl MetadataExtractor {
    pub fn new(http: Arc<FetchClient>) -> Self {
        Self { http }
    }

    /// Fetches and parses `page_url`, caching the result under
    /// `metadata:sha256(baseDomain)` for 24h.
    pub async fn extract(
        &self,
        cache: &dyn Cache,
        page_url: &str,
    ) -> Result<PageMetadata, MetadataError> {
        let domain = base_domain(page_url)?;
        let cache_key = sha256_hex(&domain);

        if let Some(cached) = cache
            .get_json::<PageMetadata>(ns::METADATA, &cache_key)
            .await
            .ok()
            .flatten()
        {
            return Ok(cached);
        }

        let response = self
            .http
            .get(page_url)
            .await
            .map_err(|e| MetadataError::Fetch(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| MetadataError::Fetch(e.to_string()))?;

        let metadata = parse_page(&body, page_url, &domain);

        let _ = cache.set_json(ns::METADATA, &cache_key, &metadata, METADATA_TTL).await;
        Ok(metadata)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error("invalid page URL: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
}

fn base_domain(page_url: &str) -> Result<String, MetadataError> {
    let url = Url::parse(page_url).map_err(|e| MetadataError::InvalidUrl(e.to_string()))?;
    url.host_str()
        .map(|h| h.to_string())
        .ok_or_else(|| MetadataError::InvalidUrl("no host".to_string()))
}

/// Parses OG tags, JSON-LD blocks, and the favicon out of an HTML
/// document. `og:image*` / `og:video*` attribute tags apply to the
/// most recently appended media entry, matching §4.6's "last media
/// entry" rule.
fn parse_page(body: &str, page_url: &str, domain: &str) -> PageMetadata {
    let document = Html::parse_document(body);
    let mut metadata = PageMetadata {
        domain: Some(domain.to_string()),
        ..Default::default()
    };

    let meta_selector = Selector::parse("meta[property], meta[name]").unwrap();
    for element in document.select(&meta_selector) {
        let key = element
            .value()
            .attr("property")
            .or_else(|| element.value().attr("name"))
            .unwrap_or_default();
        let Some(content) = element.value().attr("content") else {
            continue;
        };
        apply_og_tag(&mut metadata, key, content);
    }

    let script_selector = Selector::parse(r#"script[type="application/ld+json"]"#).unwrap();
    for element in document.select(&script_selector) {
        let text = element.text().collect::<String>();
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
            metadata.raw_ld.push(value);
        }
    }

    let link_selector = Selector::parse("link[rel]").unwrap();
    let mut best_favicon: Option<(u8, String)> = None;
    for element in document.select(&link_selector) {
        let rel = element.value().attr("rel").unwrap_or_default();
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let priority = match rel {
            "icon" | "shortcut icon" => 2,
            "apple-touch-icon" => 1,
            _ => continue,
        };
        if best_favicon.as_ref().map(|(p, _)| priority > *p).unwrap_or(true) {
            best_favicon = Some((priority, resolve(page_url, href)));
        }
    }
    metadata.favicon = best_favicon.map(|(_, href)| href);

    if metadata.url.is_none() {
        metadata.url = Some(page_url.to_string());
    }

    metadata
}

fn apply_og_tag(metadata: &mut PageMetadata, key: &str, content: &str) {
    match key {
        "og:title" => metadata.title = Some(content.to_string()),
        "og:description" | "description" => metadata.description = Some(content.to_string()),
        "og:site_name" => metadata.site_name = Some(content.to_string()),
        "og:url" => metadata.url = Some(content.to_string()),
        "og:type" => metadata.og_type = Some(content.to_string()),
        "og:locale" => metadata.locale = Some(content.to_string()),
        "theme-color" => metadata.theme_color = Some(content.to_string()),
        "og:image" | "og:image:url" => metadata.images.push(content.to_string()),
        "og:image:width" | "og:image:height" | "og:image:alt" | "og:image:type" => {
            // Attribute of the last image entry; nothing structured to
            // attach it to in this flattened model, so it's a no-op beyond
            // having already appended the image URL itself.
        }
        "og:video" | "og:video:url" => metadata.videos.push(content.to_string()),
        "og:video:width" | "og:video:height" | "og:video:type" => {}
        _ => {}
    }
}

fn resolve(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}
