use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Feed shapes produced by the parser and served back out of the pipeline.
///
/// `feedType` mirrors the original feed's nature rather than its wire
/// format: a podcast RSS feed is `"podcast"` even though it's XML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum FeedType {
    #[serde(rename = "rss")]
    Rss,
    #[serde(rename = "article")]
    Article,
    #[serde(rename = "podcast")]
    Podcast,
    #[serde(rename = "unknown")]
    #[default]
    Unknown,
}

/// Dominant color extracted from a thumbnail, `(r, g, b)` each in `[0, 255]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    /// Sentinel returned whenever the color pipeline took a declared
    /// failure path (invalid URL, fetch failure, decode failure, k-means
    /// failure). Never returned for any other reason.
    pub const SENTINEL: RgbColor = RgbColor { r: 128, g: 128, b: 128 };
}

/// Lifecycle state of an item's `thumbnailColor` field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailColorState {
    /// No thumbnail, or no color work has been attempted yet.
    #[default]
    Absent,
    /// Submitted to the enrichment pool; not yet computed.
    Scheduled,
    /// A real (or sentinel) color has been computed and cached.
    Computed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Enclosure {
    pub url: String,
    pub length: Option<u64>,
    #[serde(rename = "type")]
    pub mime_type: Option<String>,
}

/// One entry in a `Feed`, normalized from whatever the parser produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(rename = "contentEncoded", default)]
    pub content_encoded: Option<String>,
    pub link: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,

    /// ISO-8601, `2006-01-02T15:04:05Z07:00`-shaped. Empty when the
    /// source feed supplied nothing parseable.
    #[serde(default)]
    pub published: String,
    #[serde(default)]
    pub created: String,

    #[serde(default)]
    pub enclosures: Vec<Enclosure>,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(rename = "thumbnailColor", default)]
    pub thumbnail_color: Option<RgbColor>,
    #[serde(rename = "thumbnailColorState", default)]
    pub thumbnail_color_state: ThumbnailColorState,

    /// Podcast extras; absent for non-podcast items.
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub episode: Option<i64>,
    #[serde(default)]
    pub season: Option<i64>,
    #[serde(rename = "episodeType", default)]
    pub episode_type: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl FeedItem {
    /// §3 validity: title and link both non-empty.
    pub fn is_valid(&self) -> bool {
        !self.title.is_empty() && !self.link.is_empty()
    }

    pub fn id_from_link_or_guid(link: &str, guid: &str) -> String {
        let basis = if !link.is_empty() { link } else { guid };
        sha256_hex(basis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feed {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(rename = "feedType", default)]
    pub feed_type: FeedType,
    pub url: String,
    /// RFC3339 wall-clock time of last successful fetch.
    #[serde(rename = "lastUpdated")]
    pub last_updated: chrono::DateTime<chrono::Utc>,
    pub items: Vec<FeedItem>,

    /// Used for staleness checks (§4.8); distinct from `lastUpdated`
    /// because a feed read from cache keeps its original `lastUpdated`
    /// even across a cheap conditional-GET refresh.
    #[serde(rename = "lastRefreshed")]
    pub last_refreshed: chrono::DateTime<chrono::Utc>,

    /// Conditional-GET bookkeeping, not part of the public contract but
    /// carried through the cache so `fetchAndCache` can send it back out
    /// on the next refresh.
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(rename = "lastModified", default)]
    pub last_modified_header: Option<String>,
}

impl Feed {
    pub fn id_from_url(url: &str) -> String {
        sha256_hex(url)
    }

    /// §3 invariant: items sorted descending by `published`, unparseable
    /// dates last, stable among equals.
    pub fn sort_items(items: &mut [FeedItem]) {
        items.sort_by(|a, b| {
            match (parse_published(&a.published), parse_published(&b.published)) {
                (Some(pa), Some(pb)) => pb.cmp(&pa),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
    }
}

pub fn parse_published(value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    if value.is_empty() {
        return None;
    }
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Open Graph / JSON-LD / favicon metadata for one page (C6).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "siteName")]
    pub site_name: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub og_type: Option<String>,
    pub locale: Option<String>,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub favicon: Option<String>,
    #[serde(rename = "themeColor")]
    pub theme_color: Option<String>,
    pub domain: Option<String>,
    /// Raw JSON-LD blocks found on the page, unparsed beyond being valid JSON.
    #[serde(rename = "rawLd", default)]
    pub raw_ld: Vec<serde_json::Value>,
}

/// A per-URL slot in a `ParseFeeds` response: either a populated feed or
/// an error placeholder (§4.8 step 3, §7 propagation policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FeedSlot {
    Ok {
        #[serde(flatten)]
        feed: Feed,
    },
    Error {
        #[serde(rename = "feedType")]
        feed_type: FeedType,
        #[serde(rename = "feedUrl")]
        feed_url: String,
        guid: String,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseFeedsOptions {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(rename = "itemsPerPage", default = "default_items_per_page")]
    pub items_per_page: usize,
    #[serde(rename = "enrichMetadata", default = "default_true")]
    pub enrich_metadata: bool,
    #[serde(rename = "enrichColors", default = "default_true")]
    pub enrich_colors: bool,
}

impl Default for ParseFeedsOptions {
    fn default() -> Self {
        ParseFeedsOptions {
            page: default_page(),
            items_per_page: default_items_per_page(),
            enrich_metadata: true,
            enrich_colors: true,
        }
    }
}

fn default_page() -> usize {
    1
}
fn default_items_per_page() -> usize {
    50
}
fn default_true() -> bool {
    true
}

impl ParseFeedsOptions {
    /// §4.8 pagination clamp: `page >= 1`, `itemsPerPage >= 1`.
    pub fn normalized(mut self) -> Self {
        if self.page == 0 {
            self.page = 1;
        }
        if self.items_per_page == 0 {
            self.items_per_page = 1;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ParseFeedsMetadata {
    #[serde(rename = "totalItems")]
    pub total_items: usize,
    #[serde(rename = "parseTimeMs")]
    pub parse_time_ms: u128,
    #[serde(rename = "cacheHits")]
    pub cache_hits: usize,
    #[serde(rename = "cacheMisses")]
    pub cache_misses: usize,
    #[serde(rename = "enrichedItems")]
    pub enriched_items: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseFeedsResponse {
    pub feeds: Vec<FeedSlot>,
    pub metadata: ParseFeedsMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_validity_requires_title_and_link() {
        let mut item = FeedItem {
            title: "Hello".into(),
            link: "https://example.com/a".into(),
            ..Default::default()
        };
        assert!(item.is_valid());
        item.title.clear();
        assert!(!item.is_valid());
    }

    #[test]
    fn id_falls_back_to_guid_when_link_absent() {
        let id_with_link = FeedItem::id_from_link_or_guid("https://x/a", "guid-1");
        let id_without_link = FeedItem::id_from_link_or_guid("", "guid-1");
        assert_eq!(id_with_link, sha256_hex("https://x/a"));
        assert_eq!(id_without_link, sha256_hex("guid-1"));
        assert_ne!(id_with_link, id_without_link);
    }

    #[test]
    fn sort_items_orders_descending_with_unparseable_last() {
        let mut items = vec![
            FeedItem {
                id: "a".into(),
                title: "a".into(),
                link: "a".into(),
                published: "2024-01-01T00:00:00Z".into(),
                ..Default::default()
            },
            FeedItem {
                id: "b".into(),
                title: "b".into(),
                link: "b".into(),
                published: "".into(),
                ..Default::default()
            },
            FeedItem {
                id: "c".into(),
                title: "c".into(),
                link: "c".into(),
                published: "2024-06-01T00:00:00Z".into(),
                ..Default::default()
            },
        ];
        Feed::sort_items(&mut items);
        assert_eq!(items[0].id, "c");
        assert_eq!(items[1].id, "a");
        assert_eq!(items[2].id, "b");
    }

    #[test]
    fn options_clamp_zero_items_per_page_to_one() {
        let opts = ParseFeedsOptions {
            page: 0,
            items_per_page: 0,
            enrich_metadata: true,
            enrich_colors: true,
        }
        .normalized();
        assert_eq!(opts.page, 1);
        assert_eq!(opts.items_per_page, 1);
    }
}
