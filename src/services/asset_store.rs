//! Asset Store
//!
//! The single in-memory snapshot of tracked assets plus the load status.
//! Written only by the orchestrator task; read by HTTP handlers through
//! [`SharedAssetStore`]. Merge semantics are explicit: a fetch replaces the
//! whole record set, push updates and simulation ticks patch fields in place.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FetchError;
use crate::models::asset::Asset;

pub type SharedAssetStore = Arc<RwLock<AssetStore>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    NotStarted,
    Loading,
    Loaded,
    LoadFailed,
}

/// Emitted whenever an operation actually moves the status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: LoadStatus,
    pub to: LoadStatus,
}

#[derive(Debug, Clone)]
pub struct AssetStore {
    assets: Vec<Asset>,
    /// id -> position in `assets`
    index: HashMap<String, usize>,
    status: LoadStatus,
    last_error: Option<FetchError>,
    last_updated: Option<DateTime<Utc>>,
}

impl Default for AssetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetStore {
    pub fn new() -> Self {
        Self {
            assets: Vec::new(),
            index: HashMap::new(),
            status: LoadStatus::NotStarted,
            last_error: None,
            last_updated: None,
        }
    }

    pub fn shared() -> SharedAssetStore {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn status(&self) -> LoadStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&FetchError> {
        self.last_error.as_ref()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn get(&self, id: &str) -> Option<&Asset> {
        self.index.get(id).map(|&i| &self.assets[i])
    }

    pub fn ids(&self) -> Vec<String> {
        self.assets.iter().map(|a| a.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// A fetch is starting. Only an empty store shows as loading, so a
    /// background poll never blanks the display.
    pub fn begin_fetch(&mut self) -> Option<StatusChange> {
        self.last_error = None;
        if self.assets.is_empty() {
            self.set_status(LoadStatus::Loading)
        } else {
            None
        }
    }

    /// Replace the entire record set with a completed fetch
    pub fn fetch_succeeded(&mut self, assets: Vec<Asset>) -> Option<StatusChange> {
        self.replace_all(assets);
        self.last_error = None;
        self.last_updated = Some(Utc::now());
        self.set_status(LoadStatus::Loaded)
    }

    /// Record a failed fetch; existing records stay visible
    pub fn fetch_failed(&mut self, error: FetchError) -> Option<StatusChange> {
        if self.assets.is_empty() {
            tracing::error!("Initial market data fetch failed: {}", error);
        } else {
            tracing::warn!("Periodic market data update failed: {}", error);
        }
        self.last_error = Some(error);
        self.set_status(LoadStatus::LoadFailed)
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Push path: price only. Returns false for unknown ids.
    pub fn patch_price(&mut self, id: &str, price: f64) -> bool {
        match self.index.get(id) {
            Some(&i) => {
                self.assets[i].price = price;
                true
            }
            None => false,
        }
    }

    /// Simulation path: price plus the market cap derived from it
    pub fn patch_simulated(&mut self, id: &str, price: f64) -> bool {
        match self.index.get(id) {
            Some(&i) => {
                let asset = &mut self.assets[i];
                asset.price = price;
                asset.market_cap = price * asset.circulating_supply;
                true
            }
            None => false,
        }
    }

    /// First record wins for a repeated id
    fn replace_all(&mut self, assets: Vec<Asset>) {
        let mut index = HashMap::with_capacity(assets.len());
        let mut kept = Vec::with_capacity(assets.len());

        for asset in assets {
            if index.contains_key(&asset.id) {
                tracing::warn!(id = %asset.id, "Dropping duplicate asset record");
                continue;
            }
            index.insert(asset.id.clone(), kept.len());
            kept.push(asset);
        }

        self.index = index;
        self.assets = kept;
    }

    fn set_status(&mut self, status: LoadStatus) -> Option<StatusChange> {
        if self.status == status {
            return None;
        }
        let change = StatusChange {
            from: self.status,
            to: status,
        };
        tracing::debug!(from = ?change.from, to = ?change.to, "Store status changed");
        self.status = status;
        Some(change)
    }
}
