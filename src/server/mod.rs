//! HTTP server - thin API surface over the reconciliation core
//!
//! Routes mirror what the dashboard frontend consumes: poste resolution,
//! event timelines, tag lookup, and the admin inventory/cache endpoints.

pub mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::resolver::Resolver;
use crate::timeline::TimelineEngine;

/// State shared across handlers
pub struct AppState {
    pub resolver: Resolver,
    pub timeline: TimelineEngine,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(resolver: Resolver) -> Self {
        let timeline = TimelineEngine::new(resolver.clone());
        Self { resolver, timeline }
    }
}

/// Create the API router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/poste/:token_id", get(routes::get_poste))
        .route("/api/events/:token_id", get(routes::get_events))
        .route(
            "/api/resolve-asset-tag/:asset_tag",
            get(routes::resolve_asset_tag),
        )
        .route("/api/admin/inventory", get(routes::admin_inventory))
        .route("/api/admin/cache-metrics", get(routes::admin_cache_metrics))
        .route("/api/admin/cache/clear", post(routes::admin_cache_clear))
        .with_state(state)
}
