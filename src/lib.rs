// src/lib.rs

use axum::{routing::get, Router};
use services::{asset_store::SharedAssetStore, push_channel::ChannelStatus};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub store: SharedAssetStore,
    pub channel: Option<ChannelStatus>,
}

pub mod services {
    pub mod asset_store;
    pub mod coingecko;
    pub mod orchestrator;
    pub mod push_channel;
    pub mod simulator;
}

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(hello_tracker))
        .route("/api/assets", get(handlers::assets::get_assets))
        .route("/api/assets/{id}", get(handlers::assets::get_asset))
        .route("/api/status", get(handlers::assets::get_status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn hello_tracker() -> &'static str {
    "Hello from Crypto Tracker!"
}
