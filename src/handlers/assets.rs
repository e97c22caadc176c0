//! Read API over the asset store
//!
//! Snapshots are cloned under the read lock and serialized after it is
//! released.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FetchError;
use crate::models::asset::Asset;
use crate::services::asset_store::LoadStatus;
use crate::services::push_channel::ChannelState;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorView {
    pub kind: &'static str,
    pub message: &'static str,
}

impl From<&FetchError> for ErrorView {
    fn from(e: &FetchError) -> Self {
        Self {
            kind: e.kind(),
            message: e.user_message(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetsResponse {
    pub status: LoadStatus,
    pub error: Option<ErrorView>,
    pub last_updated: Option<DateTime<Utc>>,
    pub assets: Vec<Asset>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: LoadStatus,
    pub error: Option<ErrorView>,
    pub asset_count: usize,
    /// None when push updates are disabled
    pub channel: Option<ChannelState>,
}

#[derive(Debug, Serialize)]
pub struct NotFoundResponse {
    pub error: String,
}

/// GET /api/assets
pub async fn get_assets(State(state): State<AppState>) -> Json<AssetsResponse> {
    let store = state.store.read();
    Json(AssetsResponse {
        status: store.status(),
        error: store.last_error().map(ErrorView::from),
        last_updated: store.last_updated(),
        assets: store.assets().to_vec(),
    })
}

/// GET /api/assets/{id}
pub async fn get_asset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Asset>, (StatusCode, Json<NotFoundResponse>)> {
    let asset = state.store.read().get(&id).cloned();
    asset.map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(NotFoundResponse {
                error: format!("Asset '{}' is not tracked", id),
            }),
        )
    })
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let channel = state.channel.as_ref().map(|c| c.state());
    let store = state.store.read();
    Json(StatusResponse {
        status: store.status(),
        error: store.last_error().map(ErrorView::from),
        asset_count: store.len(),
        channel,
    })
}
