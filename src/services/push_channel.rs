//! Push-Update Channel
//!
//! Streams incremental price updates from the CoinCap price websocket.
//! One channel object owns at most one connection task, its attempt counter
//! and its backoff timer. Connection state lives in [`ChannelMachine`], which
//! has no I/O and is tested on its own; the worker task drives it through an
//! injected [`PushTransport`].

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use crate::error::ChannelError;

/// Ids subscribed when the caller passes none
const FALLBACK_ASSET_IDS: &str = "bitcoin,ethereum";

#[derive(Debug, Clone)]
pub struct PushChannelConfig {
    /// Websocket base URL; `?assets=` is appended
    pub ws_url: String,
    /// Delay before the first reconnect, doubled for each later one
    pub reconnect_base_delay: Duration,
    /// Unclean closures tolerated before the channel gives up
    pub max_reconnect_attempts: u32,
}

impl Default for PushChannelConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws.coincap.io/prices".to_string(),
            reconnect_base_delay: Duration::from_millis(5000),
            max_reconnect_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
    Backoff { attempt: u32 },
    Exhausted,
}

/// What the channel reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Ready,
    Prices(Vec<(String, f64)>),
    Exhausted,
}

/// Decision taken after a connection ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    Retry(Duration),
    GiveUp,
    Stop,
}

#[derive(Debug, Clone)]
pub struct ChannelMachine {
    state: ChannelState,
    attempts: u32,
    max_attempts: u32,
    base_delay: Duration,
}

impl ChannelMachine {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            state: ChannelState::Closed,
            attempts: 0,
            max_attempts,
            base_delay,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns true when a fresh connection should be started
    pub fn open(&mut self) -> bool {
        match self.state {
            ChannelState::Closed | ChannelState::Exhausted => {
                self.attempts = 0;
                self.state = ChannelState::Connecting;
                true
            }
            _ => false,
        }
    }

    pub fn connected(&mut self) {
        if self.state == ChannelState::Connecting {
            self.state = ChannelState::Open;
            self.attempts = 0;
        }
    }

    /// A connection (or a connect attempt) ended
    pub fn disconnected(&mut self, clean: bool) -> Reconnect {
        match self.state {
            ChannelState::Connecting | ChannelState::Open => {}
            _ => return Reconnect::Stop,
        }

        if clean {
            self.state = ChannelState::Closed;
            return Reconnect::Stop;
        }

        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            self.state = ChannelState::Exhausted;
            return Reconnect::GiveUp;
        }

        self.state = ChannelState::Backoff {
            attempt: self.attempts,
        };
        Reconnect::Retry(self.backoff_delay(self.attempts))
    }

    /// Backoff elapsed; returns true when the reconnect should go ahead
    pub fn retry(&mut self) -> bool {
        match self.state {
            ChannelState::Backoff { .. } => {
                self.state = ChannelState::Connecting;
                true
            }
            _ => false,
        }
    }

    pub fn close(&mut self) {
        self.state = ChannelState::Closed;
    }

    /// `base × 2^(attempt − 1)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// One inbound frame, already reduced to what the channel cares about
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Closed { clean: bool },
}

#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushConnection>, ChannelError>;
}

#[async_trait]
pub trait PushConnection: Send {
    /// Next frame. Errors and a stream ending without a close frame are
    /// reported as an unclean close.
    async fn recv(&mut self) -> Frame;

    async fn close(&mut self);
}

/// Shared between the channel object and its worker. The generation is
/// bumped on every open/close so a superseded worker can no longer touch the
/// machine or emit events.
struct ChannelShared {
    machine: ChannelMachine,
    generation: u64,
}

/// Read-only view of a channel's state, for status reporting
#[derive(Clone)]
pub struct ChannelStatus {
    shared: Arc<Mutex<ChannelShared>>,
}

impl ChannelStatus {
    pub fn state(&self) -> ChannelState {
        self.shared.lock().machine.state()
    }
}

pub struct PushChannel {
    config: PushChannelConfig,
    transport: Arc<dyn PushTransport>,
    shared: Arc<Mutex<ChannelShared>>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PushChannel {
    pub fn new(
        config: PushChannelConfig,
        transport: Arc<dyn PushTransport>,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let machine = ChannelMachine::new(config.max_reconnect_attempts, config.reconnect_base_delay);

        let channel = Self {
            config,
            transport,
            shared: Arc::new(Mutex::new(ChannelShared {
                machine,
                generation: 0,
            })),
            events_tx,
            stop_tx: None,
            task: None,
        };

        (channel, events_rx)
    }

    pub fn state(&self) -> ChannelState {
        self.shared.lock().machine.state()
    }

    pub fn attempts(&self) -> u32 {
        self.shared.lock().machine.attempts()
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            shared: self.shared.clone(),
        }
    }

    /// Start streaming prices for `ids`. No-op while a connection is active
    /// or pending.
    pub fn open(&mut self, ids: &[String]) {
        let generation = {
            let mut shared = self.shared.lock();
            if !shared.machine.open() {
                debug!(state = ?shared.machine.state(), "Push channel already active");
                return;
            }
            shared.generation += 1;
            shared.generation
        };

        let url = channel_url(&self.config.ws_url, ids);
        let (stop_tx, stop_rx) = oneshot::channel();

        let worker = Worker {
            url,
            generation,
            transport: self.transport.clone(),
            shared: self.shared.clone(),
            events_tx: self.events_tx.clone(),
        };

        self.stop_tx = Some(stop_tx);
        self.task = Some(tokio::spawn(worker.run(stop_rx)));
    }

    /// Close the connection and cancel any pending reconnect. Safe to call
    /// repeatedly.
    pub fn close(&mut self) {
        {
            let mut shared = self.shared.lock();
            if shared.machine.state() != ChannelState::Closed {
                info!("Closing push channel");
            }
            shared.generation += 1;
            shared.machine.close();
        }

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        // The worker exits on its own once it sees the stop signal
        self.task.take();
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker {
    url: String,
    generation: u64,
    transport: Arc<dyn PushTransport>,
    shared: Arc<Mutex<ChannelShared>>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl Worker {
    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        loop {
            info!(url = %self.url, "Connecting to push channel");

            let connected = tokio::select! {
                _ = &mut stop_rx => return,
                result = self.transport.connect(&self.url) => result,
            };

            let clean = match connected {
                Ok(mut conn) => {
                    if self.update(|m| m.connected()).is_none() {
                        return;
                    }
                    info!("Push channel connection established");
                    self.emit(ChannelEvent::Ready);

                    loop {
                        let frame = tokio::select! {
                            _ = &mut stop_rx => {
                                let _ = tokio::time::timeout(Duration::from_secs(1), conn.close()).await;
                                return;
                            }
                            frame = conn.recv() => frame,
                        };

                        match frame {
                            Frame::Text(text) => self.handle_text(&text),
                            Frame::Closed { clean } => break clean,
                        }
                    }
                }
                Err(e) => {
                    warn!("Push channel connect failed: {}", e);
                    false
                }
            };

            let Some(next) = self.update(|m| m.disconnected(clean)) else {
                return;
            };

            match next {
                Reconnect::Retry(delay) => {
                    let attempt = self.update(|m| m.attempts()).unwrap_or_default();
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Push channel closed uncleanly, reconnecting"
                    );

                    tokio::select! {
                        _ = &mut stop_rx => return,
                        _ = tokio::time::sleep(delay) => {}
                    }

                    if self.update(|m| m.retry()) != Some(true) {
                        return;
                    }
                }
                Reconnect::GiveUp => {
                    let attempts = self.update(|m| m.attempts()).unwrap_or_default();
                    error!("{}", ChannelError::ReconnectExhausted(attempts));
                    self.emit(ChannelEvent::Exhausted);
                    return;
                }
                Reconnect::Stop => {
                    info!("Push channel closed cleanly");
                    return;
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match parse_price_message(text) {
            Ok(prices) if prices.is_empty() => trace!("Push message carried no usable prices"),
            Ok(prices) => {
                trace!(count = prices.len(), "Push price update");
                self.emit(ChannelEvent::Prices(prices));
            }
            Err(e) => warn!("{}", e),
        }
    }

    /// Apply `f` to the machine unless this worker has been superseded
    fn update<R>(&self, f: impl FnOnce(&mut ChannelMachine) -> R) -> Option<R> {
        let mut shared = self.shared.lock();
        if shared.generation != self.generation {
            return None;
        }
        Some(f(&mut shared.machine))
    }

    fn emit(&self, event: ChannelEvent) {
        let shared = self.shared.lock();
        if shared.generation == self.generation {
            let _ = self.events_tx.send(event);
        }
    }
}

pub fn channel_url(ws_url: &str, ids: &[String]) -> String {
    if ids.is_empty() {
        warn!("No asset ids for push channel, using {}", FALLBACK_ASSET_IDS);
        return format!("{}?assets={}", ws_url, FALLBACK_ASSET_IDS);
    }
    format!("{}?assets={}", ws_url, ids.join(","))
}

/// Parse `{ "<id>": "<price>", ... }`. Bad entries are dropped one by one;
/// only a message that is not a JSON object fails as a whole.
pub fn parse_price_message(text: &str) -> Result<Vec<(String, f64)>, ChannelError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ChannelError::ParseError(e.to_string()))?;

    let serde_json::Value::Object(entries) = value else {
        return Err(ChannelError::ParseError(format!(
            "expected an object, got {}",
            text.chars().take(64).collect::<String>()
        )));
    };

    let prices = entries
        .into_iter()
        .filter_map(|(id, raw)| {
            let price = match &raw {
                serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                serde_json::Value::Number(n) => n.as_f64(),
                _ => None,
            };
            match price {
                Some(p) if p.is_finite() && p >= 0.0 => Some((id, p)),
                _ => {
                    debug!(id = %id, value = %raw, "Dropping unparseable push price");
                    None
                }
            }
        })
        .collect();

    Ok(prices)
}

/// Real websocket transport
pub struct TungsteniteTransport;

#[async_trait]
impl PushTransport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushConnection>, ChannelError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(Box::new(TungsteniteConnection { stream }))
    }
}

struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for TungsteniteConnection {
    async fn recv(&mut self) -> Frame {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Frame::Text(text),
                Some(Ok(Message::Close(frame))) => {
                    let clean = frame
                        .as_ref()
                        .map(|f| f.code == CloseCode::Normal)
                        .unwrap_or(false);
                    debug!(?frame, clean, "Push channel received close frame");
                    return Frame::Closed { clean };
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("Push channel websocket error: {}", e);
                    return Frame::Closed { clean: false };
                }
                None => return Frame::Closed { clean: false },
            }
        }
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "Client closed connection".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!("Push channel close handshake failed: {}", e);
        }
    }
}
