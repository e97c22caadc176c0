//! Update Orchestrator
//!
//! Owns the timers and subscriptions feeding the asset store. A single task
//! multiplexes every input (fetch completions, poll and simulation ticks,
//! push channel events, shutdown) so all store writes happen on one logical
//! queue. Timers are started and cancelled in reaction to store status
//! changes only.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

use super::asset_store::{LoadStatus, SharedAssetStore, StatusChange};
use super::coingecko::MarketDataSource;
use super::push_channel::{ChannelEvent, PushChannel};
use super::simulator::PriceSimulator;
use crate::config::TrackerConfig;
use crate::error::FetchError;
use crate::models::asset::Asset;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub simulation_interval: Duration,
    pub simulation_fluctuation: f64,
    pub failure_retry: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&TrackerConfig::default())
    }
}

impl From<&TrackerConfig> for OrchestratorConfig {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            simulation_interval: config.simulation_interval,
            simulation_fluctuation: config.simulation_fluctuation,
            failure_retry: config.failure_retry,
        }
    }
}

/// The repeating poll and simulation timers plus the one-shot retry armed
/// after a failed fetch. Cancelling is dropping, so it is always idempotent.
#[derive(Default)]
struct Timers {
    poll: Option<Interval>,
    simulation: Option<Interval>,
    retry: Option<Pin<Box<Sleep>>>,
    /// Number of poll/simulation pairs started so far
    generation: u64,
}

impl Timers {
    fn restart(&mut self, poll_every: Duration, simulate_every: Duration) {
        self.cancel();
        self.poll = Some(repeating(poll_every));
        self.simulation = Some(repeating(simulate_every));
        self.generation += 1;
        debug!(
            generation = self.generation,
            poll_ms = poll_every.as_millis() as u64,
            simulation_ms = simulate_every.as_millis() as u64,
            "Started poll and simulation timers"
        );
    }

    fn cancel(&mut self) {
        let was_running = self.poll.is_some() || self.simulation.is_some();
        self.poll = None;
        self.simulation = None;
        if was_running {
            debug!("Cancelled poll and simulation timers");
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.poll.is_some() && self.simulation.is_some()
    }
}

/// First tick lands one full period after start
fn repeating(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => pending().await,
    }
}

async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(t) => t.as_mut().await,
        None => pending().await,
    }
}

/// Handle to the running orchestrator task
pub struct Orchestrator {
    store: SharedAssetStore,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Spawn the orchestrator. `channel` is the push channel and its event
    /// stream, when push updates are enabled.
    pub fn spawn(
        config: OrchestratorConfig,
        store: SharedAssetStore,
        source: Arc<dyn MarketDataSource>,
        channel: Option<(PushChannel, mpsc::UnboundedReceiver<ChannelEvent>)>,
    ) -> Self {
        let simulator = PriceSimulator::new(config.simulation_fluctuation);
        Self::spawn_with_simulator(config, store, source, channel, simulator)
    }

    pub fn spawn_with_simulator(
        config: OrchestratorConfig,
        store: SharedAssetStore,
        source: Arc<dyn MarketDataSource>,
        channel: Option<(PushChannel, mpsc::UnboundedReceiver<ChannelEvent>)>,
        simulator: PriceSimulator,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let core = OrchestratorCore::new(config, store.clone(), source, channel, simulator);

        Self {
            store,
            shutdown_tx: Some(shutdown_tx),
            task: Some(tokio::spawn(core.run(shutdown_rx))),
        }
    }

    pub fn store(&self) -> &SharedAssetStore {
        &self.store
    }

    /// Stop every timer, the channel and any in-flight fetch, then wait for
    /// the task to finish. No store mutation happens after this returns.
    pub async fn dispose(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Orchestrator task ended abnormally: {}", e);
            }
            info!("Orchestrator disposed");
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct OrchestratorCore {
    config: OrchestratorConfig,
    store: SharedAssetStore,
    source: Arc<dyn MarketDataSource>,
    channel: Option<PushChannel>,
    channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    simulator: PriceSimulator,
    timers: Timers,
    fetches: JoinSet<Result<Vec<Asset>, FetchError>>,
}

impl OrchestratorCore {
    fn new(
        config: OrchestratorConfig,
        store: SharedAssetStore,
        source: Arc<dyn MarketDataSource>,
        channel: Option<(PushChannel, mpsc::UnboundedReceiver<ChannelEvent>)>,
        simulator: PriceSimulator,
    ) -> Self {
        let (channel, channel_events) = match channel {
            Some((channel, events)) => (Some(channel), events),
            // Closed receiver: the select branch disables itself
            None => (None, mpsc::unbounded_channel().1),
        };

        Self {
            config,
            store,
            source,
            channel,
            channel_events,
            simulator,
            timers: Timers::default(),
            fetches: JoinSet::new(),
        }
    }

    async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) {
        info!("Orchestrator started");

        if self.store.read().status() == LoadStatus::NotStarted {
            info!("Dispatching initial asset fetch");
            self.start_fetch();
        }

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx => break,

                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => {
                    self.on_fetch_joined(joined);
                }

                Some(event) = self.channel_events.recv() => self.on_channel_event(event),

                _ = tick(&mut self.timers.simulation) => self.simulate(),

                _ = tick(&mut self.timers.poll) => {
                    debug!("Dispatching periodic asset fetch");
                    self.start_fetch();
                }

                _ = fire(&mut self.timers.retry) => {
                    self.timers.retry = None;
                    info!("Retrying asset fetch after failure");
                    self.start_fetch();
                }
            }
        }

        self.teardown();
    }

    fn teardown(&mut self) {
        self.timers.cancel();
        self.timers.retry = None;
        self.fetches.abort_all();
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
        info!("Orchestrator stopped");
    }

    fn start_fetch(&mut self) {
        let change = self.store.write().begin_fetch();
        if let Some(change) = change {
            self.on_status_changed(change);
        }

        let source = self.source.clone();
        self.fetches.spawn(async move { source.fetch().await });
    }

    fn on_fetch_joined(&mut self, joined: Result<Result<Vec<Asset>, FetchError>, JoinError>) {
        let result = match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => return,
            Err(e) => Err(FetchError::TransportError(format!("fetch task failed: {}", e))),
        };

        let change = match result {
            Ok(assets) => {
                debug!(count = assets.len(), "Replacing asset snapshot");
                self.store.write().fetch_succeeded(assets)
            }
            Err(e) => self.store.write().fetch_failed(e),
        };

        if let Some(change) = change {
            self.on_status_changed(change);
        }
    }

    /// Timers follow status: running while loaded, stopped otherwise
    fn on_status_changed(&mut self, change: StatusChange) {
        info!(from = ?change.from, to = ?change.to, "Asset store status changed");

        match change.to {
            LoadStatus::Loaded => {
                self.timers.retry = None;
                self.timers
                    .restart(self.config.poll_interval, self.config.simulation_interval);
                self.open_channel();
            }
            LoadStatus::LoadFailed => {
                self.timers.cancel();
                self.arm_retry();
            }
            LoadStatus::NotStarted | LoadStatus::Loading => self.timers.cancel(),
        }
    }

    fn arm_retry(&mut self) {
        if self.timers.retry.is_none() {
            debug!(
                retry_ms = self.config.failure_retry.as_millis() as u64,
                "Scheduling fetch retry"
            );
            self.timers.retry = Some(Box::pin(tokio::time::sleep(self.config.failure_retry)));
        }
    }

    fn open_channel(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            let ids = self.store.read().ids();
            channel.open(&ids);
        }
    }

    fn simulate(&mut self) {
        let touched = self.simulator.tick(&mut self.store.write());
        if touched == 0 {
            debug!("Simulation tick skipped");
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Ready => {
                let status = {
                    let mut store = self.store.write();
                    store.clear_error();
                    store.status()
                };
                if status == LoadStatus::LoadFailed {
                    info!("Push channel ready, refreshing after earlier failure");
                    self.timers.retry = None;
                    self.start_fetch();
                }
            }
            ChannelEvent::Prices(prices) => {
                let mut store = self.store.write();
                let unknown = prices
                    .iter()
                    .filter(|(id, price)| !store.patch_price(id, *price))
                    .count();
                if unknown > 0 {
                    debug!(unknown, "Ignored push prices for untracked ids");
                }
            }
            ChannelEvent::Exhausted => {
                warn!("Push channel exhausted its reconnect attempts; prices continue from polling");
            }
        }
    }
}
