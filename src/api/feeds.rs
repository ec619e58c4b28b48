//! HTTP adapter for the feed pipeline (§6). Thin: everything here does
//! is validate the request shape, delegate to `FeedPipeline`, and map
//! the result onto a status code. All real behavior lives in `domain::pipeline`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;

use crate::domain::models::{FeedSlot, ParseFeedsOptions};
use crate::domain::pipeline::FeedPipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<FeedPipeline>,
}

#[derive(Deserialize)]
pub struct ParseFeedsRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub items_per_page: Option<usize>,
    #[serde(default)]
    pub enrich_metadata: Option<bool>,
    #[serde(default)]
    pub enrich_colors: Option<bool>,
}

/// `POST /feeds`: batch fetch/refresh of every listed feed URL.
pub async fn create_feeds(
    State(state): State<AppState>,
    Json(request): Json<ParseFeedsRequest>,
) -> Response {
    if request.urls.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "urls must not be empty" })),
        )
            .into_response();
    }

    let defaults = ParseFeedsOptions::default();
    let opts = ParseFeedsOptions {
        page: request.page.unwrap_or(defaults.page),
        items_per_page: request.items_per_page.unwrap_or(defaults.items_per_page),
        enrich_metadata: request.enrich_metadata.unwrap_or(defaults.enrich_metadata),
        enrich_colors: request.enrich_colors.unwrap_or(defaults.enrich_colors),
    }
    .normalized();

    let response = state.pipeline.parse_feeds(&request.urls, opts.clone()).await;

    (
        StatusCode::OK,
        Json(json!({
            "feeds": response.feeds,
            "total_feeds": response.feeds.len(),
            "page": opts.page,
            "per_page": opts.items_per_page,
            "metadata": response.metadata,
        })),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct SingleFeedQuery {
    pub url: String,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub items_per_page: Option<usize>,
}

/// `GET /feed?url=&page=&items_per_page=`: convenience single-URL form
/// of `create_feeds`.
pub async fn get_feed(State(state): State<AppState>, Query(query): Query<SingleFeedQuery>) -> Response {
    if query.url.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "url must not be empty" })),
        )
            .into_response();
    }

    let defaults = ParseFeedsOptions::default();
    let opts = ParseFeedsOptions {
        page: query.page.unwrap_or(defaults.page),
        items_per_page: query.items_per_page.unwrap_or(defaults.items_per_page),
        enrich_metadata: true,
        enrich_colors: true,
    }
    .normalized();

    let urls = vec![query.url];
    let mut response = state.pipeline.parse_feeds(&urls, opts).await;

    match response.feeds.pop() {
        Some(FeedSlot::Ok { feed }) => (StatusCode::OK, Json(feed)).into_response(),
        Some(FeedSlot::Error { error, .. }) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": error })),
        )
            .into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "no result produced" })),
        )
            .into_response(),
    }
}
