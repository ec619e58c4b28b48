//! Item merger (C9): dedup-by-id merge of cached and freshly-parsed
//! items, bounded by a one-day recency window, with a simple
//! content-change check that decides whether a repeat id gets replaced.

use std::collections::HashMap;

use chrono::{Duration as ChronoDuration, Utc};

use super::models::{parse_published, FeedItem};

const CACHE_PERIOD_DAYS: i64 = 1;

/// Merges `existing` (read from the cache) with `new` (just parsed).
/// Items older than `CACHE_PERIOD_DAYS` drop out unless a same-id item
/// in `new` refreshes them. Order is unspecified; callers re-sort with
/// `Feed::sort_items` afterward.
pub fn merge(existing: Vec<FeedItem>, new: Vec<FeedItem>) -> Vec<FeedItem> {
    let mut by_id: HashMap<String, FeedItem> = existing
        .into_iter()
        .filter(|item| is_within_period(item, CACHE_PERIOD_DAYS))
        .map(|item| (item.id.clone(), item))
        .collect();

    for item in new {
        match by_id.get(&item.id) {
            Some(current) if is_updated_content(current, &item) => {
                by_id.insert(item.id.clone(), item);
            }
            Some(_) => {}
            None => {
                if is_within_period(&item, CACHE_PERIOD_DAYS) {
                    by_id.insert(item.id.clone(), item);
                }
            }
        }
    }

    by_id.into_values().collect()
}

fn is_updated_content(old: &FeedItem, new: &FeedItem) -> bool {
    match (parse_published(&old.published), parse_published(&new.published)) {
        (Some(old_pub), Some(new_pub)) if new_pub > old_pub => return true,
        _ => {}
    }
    new.content != old.content
}

fn is_within_period(item: &FeedItem, days: i64) -> bool {
    let Some(published) = parse_published(&item.published) else {
        return false;
    };
    Utc::now() - published < ChronoDuration::days(days)
}
