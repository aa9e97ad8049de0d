//! HTTP surface: router and handlers

pub mod health;
pub mod webhook;

use axum::{Router, extract::DefaultBodyLimit, routing};

use crate::SharedState;
use crate::config::MatchStrategy;

pub use health::health;
pub use webhook::{handle_webhook_by_host, handle_webhook_by_path};

/// Builds the router for the configured matching strategy.
///
/// Host matching serves `POST /webhook`; the path based strategies serve
/// `POST /webhook/{project_id}`. Bodies above `max_body_bytes` are refused
/// with a JSON 413 before the pipeline runs.
pub fn build_router(state: SharedState) -> Router {
    let webhook_route = match state.config.match_strategy {
        MatchStrategy::Host => {
            Router::new().route("/webhook", routing::post(handle_webhook_by_host))
        }
        MatchStrategy::PathToken | MatchStrategy::ProjectName => Router::new().route(
            "/webhook/{project_id}",
            routing::post(handle_webhook_by_path),
        ),
    };

    Router::new()
        .route("/health", routing::get(health))
        .merge(webhook_route)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .with_state(state)
}
