use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::error::FetchError;
use crate::models::asset::{Asset, CoinGeckoMarketData};

/// Anything able to produce a full, rank-ordered snapshot of the tracked assets.
#[async_trait]
pub trait MarketDataSource: Send + Sync + 'static {
    async fn fetch(&self) -> Result<Vec<Asset>, FetchError>;
}

#[derive(Clone)]
pub struct CoinGeckoService {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    asset_ids: Vec<String>,
}

impl CoinGeckoService {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        asset_ids: Vec<String>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url,
            asset_ids,
        })
    }

    /// Fetch current market data for every tracked asset, sorted by rank
    pub async fn fetch_markets(&self) -> Result<Vec<Asset>, FetchError> {
        let url = format!("{}/coins/markets", self.base_url);
        let ids = self.asset_ids.join(",");

        tracing::debug!("Fetching market data for {} from CoinGecko", ids);

        let mut request = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .query(&[
                ("vs_currency", "usd"),
                ("ids", ids.as_str()),
                ("order", "market_cap_desc"),
                ("sparkline", "true"),
                ("price_change_percentage", "1h,24h,7d"),
            ]);

        if let Some(key) = &self.api_key {
            request = request.header("x-cg-pro-api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!("CoinGecko rate limit hit");
            return Err(FetchError::RateLimited);
        }

        let body = response.text().await?;

        if !status.is_success() {
            let err = error_for_status(status, &body);
            tracing::warn!(status = status.as_u16(), "CoinGecko request failed: {}", err);
            return Err(err);
        }

        let assets = parse_markets_body(&body)?;

        tracing::info!("Fetched {} assets from CoinGecko", assets.len());

        Ok(assets)
    }
}

#[async_trait]
impl MarketDataSource for CoinGeckoService {
    async fn fetch(&self) -> Result<Vec<Asset>, FetchError> {
        self.fetch_markets().await
    }
}

/// Map a non-success HTTP status to a fetch error
pub fn error_for_status(status: StatusCode, body: &str) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return FetchError::RateLimited;
    }

    let message = match body.trim() {
        "" => status.canonical_reason().unwrap_or("unknown error").to_string(),
        text => text.chars().take(200).collect(),
    };

    FetchError::ProviderError(status.as_u16(), message)
}

/// Decode a `/coins/markets` body into rank-ordered assets
pub fn parse_markets_body(body: &str) -> Result<Vec<Asset>, FetchError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| FetchError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    let serde_json::Value::Array(items) = value else {
        return Err(FetchError::MalformedResponse(
            "expected an array of market entries".to_string(),
        ));
    };

    let mut assets = items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<CoinGeckoMarketData>(item)
                .map(Asset::from)
                .map_err(|e| FetchError::MalformedResponse(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Stable, so equal ranks keep provider order
    assets.sort_by_key(|a| a.rank);

    Ok(assets)
}
