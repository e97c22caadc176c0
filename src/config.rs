//! Runtime configuration
//!
//! Defaults suit a five-asset dashboard. Every value can be
//! overridden from the environment (a `.env` file is honoured by `main`).

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::services::push_channel::PushChannelConfig;

pub const DEFAULT_COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_ASSET_IDS: [&str; 5] = ["bitcoin", "ethereum", "tether", "binancecoin", "solana"];

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub coingecko_base_url: String,
    pub coingecko_api_key: Option<String>,
    /// Asset ids requested on every fetch and subscribed on the push channel
    pub asset_ids: Vec<String>,
    pub poll_interval: Duration,
    pub simulation_interval: Duration,
    /// Peak-to-peak relative price move per simulation tick (0.001 = ±0.05%)
    pub simulation_fluctuation: f64,
    /// Delay before a fetch is retried after a failed one
    pub failure_retry: Duration,
    pub push_enabled: bool,
    pub push: PushChannelConfig,
    pub bind_addr: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            coingecko_base_url: DEFAULT_COINGECKO_BASE_URL.to_string(),
            coingecko_api_key: None,
            asset_ids: DEFAULT_ASSET_IDS.iter().map(|s| s.to_string()).collect(),
            poll_interval: Duration::from_secs(60),
            simulation_interval: Duration::from_millis(1500),
            simulation_fluctuation: 0.001,
            failure_retry: Duration::from_secs(60),
            push_enabled: true,
            push: PushChannelConfig::default(),
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl TrackerConfig {
    /// Load from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; unset keys keep their default
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("COINGECKO_BASE_URL") {
            config.coingecko_base_url = url.trim_end_matches('/').to_string();
        }
        config.coingecko_api_key = lookup("COINGECKO_API_KEY").filter(|k| !k.is_empty());

        if let Some(raw) = lookup("TRACKED_ASSET_IDS") {
            let ids: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if ids.is_empty() {
                return Err(invalid("TRACKED_ASSET_IDS", &raw, "at least one id is required"));
            }
            config.asset_ids = ids;
        }

        if let Some(secs) = parse_opt::<u64, _>(&lookup, "POLL_INTERVAL_SECS")? {
            config.poll_interval = Duration::from_secs(positive("POLL_INTERVAL_SECS", secs)?);
        }
        if let Some(ms) = parse_opt::<u64, _>(&lookup, "SIMULATION_INTERVAL_MS")? {
            config.simulation_interval = Duration::from_millis(positive("SIMULATION_INTERVAL_MS", ms)?);
        }
        if let Some(k) = parse_opt::<f64, _>(&lookup, "SIMULATION_FLUCTUATION")? {
            if !(0.0..1.0).contains(&k) {
                return Err(invalid("SIMULATION_FLUCTUATION", &k.to_string(), "must be in [0, 1)"));
            }
            config.simulation_fluctuation = k;
        }

        // Retry delay follows the poll interval unless set explicitly
        config.failure_retry = match parse_opt::<u64, _>(&lookup, "FAILURE_RETRY_SECS")? {
            Some(secs) => Duration::from_secs(positive("FAILURE_RETRY_SECS", secs)?),
            None => config.poll_interval,
        };

        if let Some(enabled) = parse_opt::<bool, _>(&lookup, "PUSH_ENABLED")? {
            config.push_enabled = enabled;
        }
        if let Some(url) = lookup("PUSH_WS_URL") {
            config.push.ws_url = url;
        }
        if let Some(ms) = parse_opt::<u64, _>(&lookup, "PUSH_RECONNECT_BASE_MS")? {
            config.push.reconnect_base_delay = Duration::from_millis(ms);
        }
        if let Some(max) = parse_opt::<u32, _>(&lookup, "PUSH_MAX_RECONNECT_ATTEMPTS")? {
            config.push.max_reconnect_attempts = positive("PUSH_MAX_RECONNECT_ATTEMPTS", max)?;
        }

        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr;
        }

        Ok(config)
    }
}

fn parse_opt<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, &raw, &e.to_string())),
    }
}

fn positive<T: PartialOrd + Default + ToString>(key: &str, value: T) -> Result<T, ConfigError> {
    if value > T::default() {
        Ok(value)
    } else {
        Err(invalid(key, &value.to_string(), "must be greater than zero"))
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
