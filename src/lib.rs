pub mod api;
pub mod config;
pub mod domain;
pub mod infrastructure;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use api::feeds::AppState;
use domain::errors::PipelineError;
use domain::models::{Feed, FeedSlot, ParseFeedsOptions, ParseFeedsResponse};
use domain::pipeline::{Dependencies, FeedPipeline};
use infrastructure::rate_limit::{rate_limit_middleware, RateLimiter};
use infrastructure::security_headers::security_headers_middleware;

/// Returns the fixed user agent every outbound fetch presents (§4.2).
pub fn user_agent() -> String {
    format!("DigestsAPI/{}", env!("CARGO_PKG_VERSION"))
}

/// Builds the HTTP router (routes + middleware stack) over a pipeline
/// already wired with its cache/fetch/enrichment dependencies. Shared
/// between the binary entrypoint and router-level tests so route
/// wiring only lives in one place.
pub fn build_router(
    pipeline: Arc<FeedPipeline>,
    rate_limit: u32,
    rate_limit_window: Duration,
) -> Router {
    let state = AppState { pipeline };
    let rate_limiter = RateLimiter::new(rate_limit, rate_limit_window);

    Router::new()
        .route("/health", get(api::health::check))
        .route("/feeds", axum::routing::post(api::feeds::create_feeds))
        .route("/feed", get(api::feeds::get_feed))
        .with_state(state)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

pub fn into_make_service(
    router: Router,
) -> axum::extract::connect_info::IntoMakeServiceWithConnectInfo<Router, SocketAddr> {
    router.into_make_service_with_connect_info::<SocketAddr>()
}

/// Library consumer API (§6): `ParseFeed`/`ParseFeeds` over a shared
/// `Dependencies` bundle, configured via `ParseFeedsOptions`'s
/// struct-update pattern (pagination, enrichment toggles, ...).
pub async fn parse_feed(
    deps: Arc<Dependencies>,
    url: &str,
    opts: ParseFeedsOptions,
) -> Result<Feed, PipelineError> {
    let pipeline = FeedPipeline::new(deps, 1);
    let urls = vec![url.to_string()];
    let mut response = pipeline.parse_feeds(&urls, opts).await;
    match response.feeds.pop() {
        Some(FeedSlot::Ok { feed }) => Ok(feed),
        Some(FeedSlot::Error { error, .. }) => Err(PipelineError::Network(error)),
        None => Err(PipelineError::Internal("no result produced".to_string())),
    }
}

pub async fn parse_feeds(
    deps: Arc<Dependencies>,
    urls: &[String],
    opts: ParseFeedsOptions,
    fanout_limit: usize,
) -> ParseFeedsResponse {
    let pipeline = FeedPipeline::new(deps, fanout_limit);
    pipeline.parse_feeds(urls, opts).await
}
