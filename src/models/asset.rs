use serde::{Deserialize, Serialize};

/// One tracked asset as held by the store and served to the display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub rank: u32,
    pub logo: String,
    pub name: String,
    pub symbol: String,
    pub price: f64,
    #[serde(rename = "change1h")]
    pub change_1h: f64,
    #[serde(rename = "change24h")]
    pub change_24h: f64,
    #[serde(rename = "change7d")]
    pub change_7d: f64,
    pub market_cap: f64,
    pub volume_24h: f64,
    pub circulating_supply: f64,
    pub total_supply: f64,
    pub max_supply: f64,
    /// Static 7-day chart image
    pub chart_url: String,
    pub sparkline: Vec<f64>,
}

// CoinGecko /coins/markets response item
#[derive(Debug, Clone, Deserialize)]
pub struct CoinGeckoMarketData {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub image: Option<String>,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub total_volume: Option<f64>,
    pub circulating_supply: Option<f64>,
    pub total_supply: Option<f64>,
    pub max_supply: Option<f64>,
    pub price_change_percentage_1h_in_currency: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
    pub price_change_percentage_7d_in_currency: Option<f64>,
    pub sparkline_in_7d: Option<SparklineIn7d>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SparklineIn7d {
    #[serde(default)]
    pub price: Vec<Option<f64>>,
}

impl From<CoinGeckoMarketData> for Asset {
    fn from(data: CoinGeckoMarketData) -> Self {
        let lower = data.symbol.to_lowercase();
        let logo = data
            .image
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| format!("/logos/{}.svg", lower));
        let chart_url = format!("/charts/{}_7d.svg", lower);

        // Null points inside the series are dropped rather than zeroed
        let sparkline = data
            .sparkline_in_7d
            .map(|s| s.price.into_iter().flatten().collect())
            .unwrap_or_default();

        Self {
            id: data.id,
            rank: data.market_cap_rank.unwrap_or(0),
            logo,
            name: data.name,
            symbol: data.symbol.to_uppercase(),
            price: data.current_price.unwrap_or(0.0),
            change_1h: data.price_change_percentage_1h_in_currency.unwrap_or(0.0),
            change_24h: data.price_change_percentage_24h.unwrap_or(0.0),
            change_7d: data.price_change_percentage_7d_in_currency.unwrap_or(0.0),
            market_cap: data.market_cap.unwrap_or(0.0),
            volume_24h: data.total_volume.unwrap_or(0.0),
            circulating_supply: data.circulating_supply.unwrap_or(0.0),
            total_supply: data.total_supply.unwrap_or(0.0),
            max_supply: data.max_supply.unwrap_or(0.0),
            chart_url,
            sparkline,
        }
    }
}
