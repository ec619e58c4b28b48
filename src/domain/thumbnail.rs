//! Thumbnail finder (C4): picks the first available image URL for an
//! item out of an ordered list of candidates (§4.4), falling back to
//! the site's `og:image` via C6 and finally the feed-level image.

use scraper::{Html, Selector};

use crate::domain::metadata::MetadataExtractor;
use crate::domain::models::FeedItem;
use crate::infrastructure::cache::Cache;

/// Finds the thumbnail for `item`. `feed_image` is the feed/channel-level
/// image, used as the last resort before an empty string. `metadata`/`cache`
/// are only consulted for the `og:image` fallback (step 6), so a feed whose
/// items all carry their own media never triggers a page fetch.
pub async fn find(
    item: &FeedItem,
    feed_image: Option<&str>,
    metadata: &MetadataExtractor,
    cache: &dyn Cache,
) -> String {
    if let Some(url) = item
        .enclosures
        .iter()
        .find(|e| e.mime_type.as_deref().map(|m| m.starts_with("image/")).unwrap_or(false))
    {
        return url.url.clone();
    }

    if let Some(image) = &item.image {
        if !image.is_empty() {
            return image.clone();
        }
    }

    if let Some(url) = first_img_src(item.content.as_deref()) {
        return url;
    }
    if let Some(url) = first_img_src(item.description.as_deref()) {
        return url;
    }

    if !item.link.is_empty() {
        if let Ok(page_metadata) = metadata.extract(cache, &item.link).await {
            if let Some(image) = page_metadata.images.first() {
                return image.clone();
            }
        }
    }

    if let Some(feed_image) = feed_image {
        if !feed_image.is_empty() {
            return feed_image.to_string();
        }
    }

    String::new()
}

fn first_img_src(html: Option<&str>) -> Option<String> {
    let html = html?;
    if !html.contains("<img") {
        return None;
    }
    let document = Html::parse_fragment(html);
    let selector = Selector::parse("img").ok()?;
    document
        .select(&selector)
        .find_map(|el| el.value().attr("src").map(|s| s.to_string()))
}
