mod common;

use axum::http::StatusCode;
use crypto_tracker::error::FetchError;
use crypto_tracker::services::coingecko::{CoinGeckoService, MarketDataSource};

use crate::common::{
    spawn_markets_server, spawn_truncated_server, unreachable_base_url, MARKETS_BODY,
};

fn ids() -> Vec<String> {
    vec!["bitcoin".to_string(), "ethereum".to_string(), "solana".to_string()]
}

#[tokio::test]
async fn test_fetch_maps_and_sorts_markets() {
    let (base_url, seen) = spawn_markets_server(StatusCode::OK, MARKETS_BODY).await;
    let service = CoinGeckoService::new(base_url, Some("test_api_key".to_string()), ids()).unwrap();

    let assets = service.fetch().await.unwrap();

    assert_eq!(assets.len(), 3);
    let ranks: Vec<u32> = assets.iter().map(|a| a.rank).collect();
    assert_eq!(ranks, vec![1, 2, 5]);

    let btc = &assets[0];
    assert_eq!(btc.symbol, "BTC");
    assert_eq!(btc.price, 61000.0);
    assert_eq!(btc.volume_24h, 0.0);
    assert_eq!(btc.change_1h, 0.0);
    assert_eq!(btc.change_7d, 0.0);
    assert!(btc.sparkline.is_empty());

    assert_eq!(btc.chart_url, "/charts/btc_7d.svg");

    let eth = &assets[1];
    assert_eq!(eth.logo, "/logos/eth.svg");
    assert_eq!(eth.max_supply, 0.0);

    let sol = &assets[2];
    assert_eq!(sol.sparkline, vec![140.0, 145.5, 150.1]);
    assert_eq!(sol.total_supply, 0.0);

    let requests = seen.lock();
    assert_eq!(requests.len(), 1);
    let query = &requests[0].query;
    assert_eq!(query.get("vs_currency").map(String::as_str), Some("usd"));
    assert_eq!(query.get("ids").map(String::as_str), Some("bitcoin,ethereum,solana"));
    assert_eq!(query.get("sparkline").map(String::as_str), Some("true"));
    assert_eq!(
        query.get("price_change_percentage").map(String::as_str),
        Some("1h,24h,7d")
    );
    assert_eq!(requests[0].api_key.as_deref(), Some("test_api_key"));
}

#[tokio::test]
async fn test_fetch_without_api_key_sends_no_header() {
    let (base_url, seen) = spawn_markets_server(StatusCode::OK, "[]").await;
    let service = CoinGeckoService::new(base_url, None, ids()).unwrap();

    assert!(service.fetch().await.unwrap().is_empty());
    assert!(seen.lock()[0].api_key.is_none());
}

#[tokio::test]
async fn test_fetch_rate_limited() {
    let (base_url, _) = spawn_markets_server(
        StatusCode::TOO_MANY_REQUESTS,
        r#"{"status":{"error_code":429,"error_message":"You've exceeded the Rate Limit"}}"#,
    )
    .await;
    let service = CoinGeckoService::new(base_url, None, ids()).unwrap();

    assert_eq!(service.fetch().await.unwrap_err(), FetchError::RateLimited);
}

#[tokio::test]
async fn test_rate_limit_reported_even_when_body_is_cut_short() {
    let base_url = spawn_truncated_server("429 Too Many Requests").await;
    let service = CoinGeckoService::new(base_url, None, ids()).unwrap();

    assert_eq!(service.fetch().await.unwrap_err(), FetchError::RateLimited);
}

#[tokio::test]
async fn test_cut_short_body_on_other_status_is_transport_error() {
    let base_url = spawn_truncated_server("503 Service Unavailable").await;
    let service = CoinGeckoService::new(base_url, None, ids()).unwrap();

    assert!(matches!(
        service.fetch().await.unwrap_err(),
        FetchError::TransportError(_)
    ));
}

#[tokio::test]
async fn test_fetch_provider_error() {
    let (base_url, _) = spawn_markets_server(StatusCode::SERVICE_UNAVAILABLE, "maintenance").await;
    let service = CoinGeckoService::new(base_url, None, ids()).unwrap();

    assert_eq!(
        service.fetch().await.unwrap_err(),
        FetchError::ProviderError(503, "maintenance".to_string())
    );
}

#[tokio::test]
async fn test_fetch_malformed_body() {
    let (base_url, _) = spawn_markets_server(StatusCode::OK, r#"{"coins":[]}"#).await;
    let service = CoinGeckoService::new(base_url, None, ids()).unwrap();

    assert!(matches!(
        service.fetch().await.unwrap_err(),
        FetchError::MalformedResponse(_)
    ));
}

#[tokio::test]
async fn test_fetch_transport_error() {
    let service = CoinGeckoService::new(unreachable_base_url().await, None, ids()).unwrap();

    assert!(matches!(
        service.fetch().await.unwrap_err(),
        FetchError::TransportError(_)
    ));
}
