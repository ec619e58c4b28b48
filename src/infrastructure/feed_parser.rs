//! Feed parser (C3): decodes an RSS/Atom/Podcast byte stream into the
//! neutral model in `domain::models`. Decoding itself is delegated to
//! `feed-rs`. This module owns everything downstream of that: date normalization, duration
//! parsing, enclosure/image preservation, and HTML sanitization of
//! free-text fields.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::models::{Enclosure, FeedItem, FeedType};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("feed parsing failed: {0}")]
    Decode(String),
}

pub struct ParsedFeed {
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub language: Option<String>,
    pub image: Option<String>,
    pub feed_type: FeedType,
    pub items: Vec<FeedItem>,
}

/// Parses a feed body. Item order from the source is preserved here;
/// the descending-by-published re-sort happens later in the pipeline
/// (§4.8) after enrichment and merge.
pub fn parse(body: &[u8]) -> Result<ParsedFeed, ParseError> {
    let raw = feed_rs::parser::parse(body).map_err(|e| ParseError::Decode(e.to_string()))?;

    let feed_type = classify_feed_type(&raw);
    let title = raw
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_default();
    let description = raw.description.as_ref().map(|d| d.content.clone());
    let link = raw.links.first().map(|l| l.href.clone());
    let language = raw.language.clone();
    let image = raw.icon.as_ref().map(|i| i.uri.clone()).or_else(|| {
        raw.logo.as_ref().map(|i| i.uri.clone())
    });

    let items = raw
        .entries
        .into_iter()
        .map(build_item)
        .filter(|item| item.is_valid())
        .collect();

    Ok(ParsedFeed {
        title,
        description,
        link,
        language,
        image,
        feed_type,
        items,
    })
}

fn classify_feed_type(feed: &feed_rs::model::Feed) -> FeedType {
    let has_enclosures = feed
        .entries
        .iter()
        .any(|e| !e.media.is_empty() || e.links.iter().any(|l| l.media_type.as_deref().map(|m| m.starts_with("audio/")).unwrap_or(false)));
    if has_enclosures {
        FeedType::Podcast
    } else if feed.entries.is_empty() {
        FeedType::Unknown
    } else {
        FeedType::Rss
    }
}

fn build_item(entry: feed_rs::model::Entry) -> FeedItem {
    let link = entry.links.first().map(|l| l.href.clone()).unwrap_or_default();
    let guid = entry.id.clone();
    let id = FeedItem::id_from_link_or_guid(&link, &guid);

    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_else(|| "Untitled".to_string());

    let description = entry.summary.as_ref().map(|s| ammonia::clean(&s.content));
    let content = entry
        .content
        .as_ref()
        .and_then(|c| c.body.as_ref())
        .map(|body| ammonia::clean(body));
    let content_encoded = content.clone();

    let author = entry.authors.first().map(|a| a.name.clone());
    let categories = entry.categories.iter().map(|c| c.term.clone()).collect();

    let published = entry
        .published
        .or(entry.updated)
        .map(|dt| normalize_datetime(dt.into()))
        .unwrap_or_default();
    let created = entry
        .published
        .map(|dt| normalize_datetime(dt.into()))
        .unwrap_or_else(|| published.clone());

    let enclosures = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|c| {
            c.url.as_ref().map(|url| Enclosure {
                url: url.to_string(),
                length: c.size,
                mime_type: c.content_type.as_ref().map(|m| m.to_string()),
            })
        })
        .collect::<Vec<_>>();

    let duration = entry
        .media
        .iter()
        .find_map(|m| m.duration)
        .map(|d| d.as_secs())
        .or_else(|| itunes_extension(&entry, "duration").and_then(|raw| parse_duration(&raw)));

    let episode = itunes_extension(&entry, "episode").and_then(|v| v.parse::<i64>().ok());
    let season = itunes_extension(&entry, "season").and_then(|v| v.parse::<i64>().ok());
    let episode_type = itunes_extension(&entry, "episodetype");

    let image = entry
        .media
        .iter()
        .find_map(|m| m.thumbnails.first())
        .map(|t| t.image.uri.clone());

    FeedItem {
        id,
        title,
        description,
        content,
        content_encoded,
        link,
        author,
        categories,
        published,
        created,
        enclosures,
        thumbnail: String::new(),
        thumbnail_color: None,
        thumbnail_color_state: Default::default(),
        duration,
        episode,
        season,
        episode_type,
        image,
    }
}

/// Looks up an `itunes:<name>` extension element on an entry, case-
/// insensitively, since feed-rs preserves the element's source-document
/// casing rather than normalizing it.
fn itunes_extension(entry: &feed_rs::model::Entry, name: &str) -> Option<String> {
    entry
        .extensions
        .get("itunes")?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .and_then(|ext| ext.value.clone())
}

/// Output layout fixed at `2006-01-02T15:04:05Z07:00` (RFC3339).
fn normalize_datetime(dt: DateTime<chrono::FixedOffset>) -> String {
    dt.with_timezone(&Utc).to_rfc3339()
}

/// Parses a podcast `duration` field as either integer seconds or
/// `HH:MM:SS` / `MM:SS` (§4.8).
pub fn parse_duration(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [mm, ss] => {
            let mm: u64 = mm.parse().ok()?;
            let ss: u64 = ss.parse().ok()?;
            Some(mm * 60 + ss)
        }
        [hh, mm, ss] => {
            let hh: u64 = hh.parse().ok()?;
            let mm: u64 = mm.parse().ok()?;
            let ss: u64 = ss.parse().ok()?;
            Some(hh * 3600 + mm * 60 + ss)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_seconds() {
        assert_eq!(parse_duration("930"), Some(930));
    }

    #[test]
    fn parses_mm_ss() {
        assert_eq!(parse_duration("15:30"), Some(930));
    }

    #[test]
    fn parses_hh_mm_ss() {
        assert_eq!(parse_duration("1:15:30"), Some(4530));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration("not-a-duration"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn extracts_itunes_episode_fields_and_falls_back_to_duration_parsing() {
        let xml = br#"<?xml version="1.0"?>
        <rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
        <channel>
            <title>Podcast Feed</title>
            <link>https://example.com</link>
            <item>
                <title>Episode One</title>
                <link>https://example.com/ep1</link>
                <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
                <enclosure url="https://example.com/ep1.mp3" type="audio/mpeg" length="100"/>
                <itunes:episode>3</itunes:episode>
                <itunes:season>2</itunes:season>
                <itunes:episodeType>full</itunes:episodeType>
                <itunes:duration>15:30</itunes:duration>
            </item>
        </channel></rss>"#;
        let parsed = parse(xml).unwrap();
        let item = &parsed.items[0];
        assert_eq!(item.episode, Some(3));
        assert_eq!(item.season, Some(2));
        assert_eq!(item.episode_type.as_deref(), Some("full"));
        assert_eq!(item.duration, Some(930));
    }

    #[test]
    fn parses_minimal_rss() {
        let xml = br#"<?xml version="1.0"?>
        <rss version="2.0"><channel>
            <title>Example Feed</title>
            <link>https://example.com</link>
            <item>
                <title>Item One</title>
                <link>https://example.com/1</link>
                <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
            </item>
        </channel></rss>"#;
        let parsed = parse(xml).unwrap();
        assert_eq!(parsed.title, "Example Feed");
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].title, "Item One");
        assert!(!parsed.items[0].published.is_empty());
    }
}
