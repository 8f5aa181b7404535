//! API route handlers
//!
//! Errors are returned as JSON bodies with a stable `error` code the
//! frontend switches on, plus a human-readable `message`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::SharedState;
use crate::inventory::{build_inventory, InventoryError};
use crate::resolver::ResolveError;
use crate::timeline::{consumption_deltas, TimelineError};
use crate::types::PosteMetadata;

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

pub enum ApiError {
    NotFound(String),
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::NotFound(message) => (StatusCode::NOT_FOUND, "NOT_FOUND", message),
            Self::Upstream(message) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", message),
        };
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound(_) | ResolveError::TagNotFound(_) => {
                Self::NotFound(e.to_string())
            }
            ResolveError::Cache(inner) => {
                error!(error = %inner, "Resolution failed");
                Self::Upstream(inner.to_string())
            }
        }
    }
}

impl From<TimelineError> for ApiError {
    fn from(e: TimelineError) -> Self {
        error!(error = %e, "Timeline build failed");
        Self::Upstream(e.to_string())
    }
}

impl From<InventoryError> for ApiError {
    fn from(e: InventoryError) -> Self {
        match e {
            InventoryError::Resolve(inner) => inner.into(),
        }
    }
}

/// Cleartext metadata hints the caller already knows.
#[derive(Debug, Default, Deserialize)]
pub struct MetadataQuery {
    #[serde(rename = "assetTag")]
    pub asset_tag: Option<String>,
    pub ubicacion: Option<String>,
    #[serde(rename = "imageURI")]
    pub image_uri: Option<String>,
}

impl MetadataQuery {
    fn into_metadata(self) -> Option<PosteMetadata> {
        if self.asset_tag.is_none() && self.ubicacion.is_none() && self.image_uri.is_none() {
            return None;
        }
        Some(PosteMetadata {
            asset_tag: self.asset_tag,
            ubicacion: self.ubicacion,
            image_uri: self.image_uri,
        })
    }
}

/// GET /api/poste/:token_id
pub async fn get_poste(
    State(state): State<SharedState>,
    Path(token_id): Path<String>,
    Query(query): Query<MetadataQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let resolved = state
        .resolver
        .resolve(&token_id, query.into_metadata())
        .await?;
    Ok(Json(resolved))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    pub events: Vec<crate::types::PosteEvent>,
    pub deltas: Vec<crate::timeline::ConsumptionDelta>,
}

/// GET /api/events/:token_id
pub async fn get_events(
    State(state): State<SharedState>,
    Path(token_id): Path<String>,
    Query(query): Query<MetadataQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state
        .timeline
        .timeline(&token_id, query.into_metadata())
        .await?;
    let deltas = consumption_deltas(&events);
    Ok(Json(EventsResponse { events, deltas }))
}

/// GET /api/resolve-asset-tag/:asset_tag
pub async fn resolve_asset_tag(
    State(state): State<SharedState>,
    Path(asset_tag): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let token_id = state.resolver.resolve_tag(&asset_tag).await?;
    Ok(Json(json!({ "tokenId": token_id })))
}

/// GET /api/admin/inventory
pub async fn admin_inventory(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = build_inventory(&state.resolver).await?;
    Ok(Json(entries))
}

/// GET /api/admin/cache-metrics
pub async fn admin_cache_metrics(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.resolver.cache().metrics())
}

/// POST /api/admin/cache/clear
pub async fn admin_cache_clear(State(state): State<SharedState>) -> impl IntoResponse {
    state.resolver.cache().clear().await;
    Json(json!({ "cleared": true }))
}
