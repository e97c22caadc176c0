use axum::{
    extract::Query,
    http::{HeaderMap, StatusCode},
    routing::get,
    Router,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// One request seen by the fake provider
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub query: HashMap<String, String>,
    pub api_key: Option<String>,
}

/// Serve `/coins/markets` with a canned response on a random local port.
/// Returns the base URL and the log of received requests.
pub async fn spawn_markets_server(
    status: StatusCode,
    body: &'static str,
) -> (String, Arc<Mutex<Vec<SeenRequest>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    let app = Router::new().route(
        "/coins/markets",
        get(move |Query(query): Query<HashMap<String, String>>, headers: HeaderMap| {
            let log = log.clone();
            async move {
                log.lock().push(SeenRequest {
                    query,
                    api_key: headers
                        .get("x-cg-pro-api-key")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string),
                });
                (status, body)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind fake provider");
    let addr = listener.local_addr().expect("No local address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Fake provider crashed");
    });

    (format!("http://{}", addr), seen)
}

/// A base URL nothing is listening on
pub async fn unreachable_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("No local address");
    drop(listener);
    format!("http://{}", addr)
}

/// Answer one request with `status_line` and a body cut short of its
/// declared length, so reading the body fails.
pub async fn spawn_truncated_server(status_line: &'static str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind truncating server");
    let addr = listener.local_addr().expect("No local address");

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };

        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }

        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: 1000\r\nconnection: close\r\n\r\n{{\"partial",
            status_line
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    });

    format!("http://{}", addr)
}

pub const MARKETS_BODY: &str = r#"[
    {"id":"solana","symbol":"sol","name":"Solana","image":"https://img/sol.png",
     "current_price":150.1,"market_cap":70000000000,"market_cap_rank":5,"total_volume":3000000000,
     "circulating_supply":466000000,"total_supply":null,"max_supply":null,
     "price_change_percentage_1h_in_currency":0.4,"price_change_percentage_24h":-2.1,
     "price_change_percentage_7d_in_currency":8.3,"sparkline_in_7d":{"price":[140.0,145.5,150.1]}},
    {"id":"bitcoin","symbol":"btc","name":"Bitcoin","image":"https://img/btc.png",
     "current_price":61000,"market_cap":1200000000000,"market_cap_rank":1,"total_volume":null,
     "circulating_supply":19700000,"total_supply":21000000,"max_supply":21000000,
     "price_change_percentage_1h_in_currency":null,"price_change_percentage_24h":1.2,
     "price_change_percentage_7d_in_currency":null},
    {"id":"ethereum","symbol":"eth","name":"Ethereum","image":null,
     "current_price":3000,"market_cap":360000000000,"market_cap_rank":2,"total_volume":15000000000,
     "circulating_supply":120000000,"total_supply":120000000,"max_supply":null,
     "price_change_percentage_1h_in_currency":-0.1,"price_change_percentage_24h":0.8,
     "price_change_percentage_7d_in_currency":2.5,"sparkline_in_7d":{"price":[]}}
]"#;
