use thiserror::Error;

/// Failure of one market data fetch. Never fatal; the orchestrator records it
/// on the store and carries on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Rate limit exceeded by market data provider")]
    RateLimited,

    #[error("Market data provider error {0}: {1}")]
    ProviderError(u16, String),

    #[error("Malformed market data response: {0}")]
    MalformedResponse(String),

    #[error("Transport error: {0}")]
    TransportError(String),
}

impl FetchError {
    /// Stable machine-readable kind, used by the read API.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::RateLimited => "rate_limited",
            FetchError::ProviderError(..) => "provider_error",
            FetchError::MalformedResponse(_) => "malformed_response",
            FetchError::TransportError(_) => "transport_error",
        }
    }

    /// Message shown to the user. One per kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            FetchError::RateLimited => "API rate limit exceeded. Retrying automatically shortly.",
            _ => "Failed to load market data. Please try again later.",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::TransportError(e.to_string())
    }
}

/// Push channel failures. None of these reach the store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Push channel gave up after {0} reconnect attempts")]
    ReconnectExhausted(u32),

    #[error("Unparseable push message: {0}")]
    ParseError(String),

    #[error("Push transport error: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}
