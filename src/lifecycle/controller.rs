//! Start/stop control and the periodic driver loop.

use super::cycle::CycleContext;
use super::status::{Status, StatusHandle};
use crate::config::{AnalyzerConfig, BinanceConfig, Config};
use crate::exchange::{AssetPair, BinanceMarketClient, Market, MarketClient, MarketEvent};
use crate::persistence::PersistenceManager;
use crate::strategy::{DualLegCoordinator, LegExecutor, SpreadMonitor};
use crate::telemetry::{NullPublisher, Publisher, WebSocketPublisher};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const EVENT_BUFFER: usize = 32;

/// Why a run could not be started.
#[derive(Error, Debug)]
pub enum StartError {
    /// A run is active or ended in error and was not stopped.
    #[error("Cannot start while status is {0}")]
    InvalidStatus(Status),

    /// The analyzer document did not parse or validate.
    #[error("Invalid analyzer configuration: {0}")]
    InvalidConfig(String),

    /// The order/trade store could not be opened.
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// A market client could not be built.
    #[error("Market client unavailable: {0}")]
    Market(String),
}

/// Builds the client for one market from run credentials.
pub trait MarketFactory: Send + Sync {
    fn create(&self, market: Market, credentials: &BinanceConfig) -> Result<Arc<dyn MarketClient>>;
}

/// Live Binance clients.
pub struct BinanceMarketFactory;

impl MarketFactory for BinanceMarketFactory {
    fn create(&self, market: Market, credentials: &BinanceConfig) -> Result<Arc<dyn MarketClient>> {
        Ok(Arc::new(BinanceMarketClient::new(market, credentials)?))
    }
}

/// Hands out pre-built clients, e.g. mock markets for paper runs.
pub struct StaticMarketFactory {
    future: Arc<dyn MarketClient>,
    spot: Arc<dyn MarketClient>,
}

impl StaticMarketFactory {
    pub fn new(future: Arc<dyn MarketClient>, spot: Arc<dyn MarketClient>) -> Self {
        Self { future, spot }
    }
}

impl MarketFactory for StaticMarketFactory {
    fn create(
        &self,
        market: Market,
        _credentials: &BinanceConfig,
    ) -> Result<Arc<dyn MarketClient>> {
        Ok(match market {
            Market::Future => self.future.clone(),
            Market::Spot => self.spot.clone(),
        })
    }
}

/// Collaborators of an active run.
struct Running {
    future: Arc<dyn MarketClient>,
    spot: Arc<dyn MarketClient>,
    publisher: Arc<dyn Publisher>,
    persistence: Arc<PersistenceManager>,
    shutdown: oneshot::Sender<()>,
    driver: JoinHandle<()>,
}

/// Owns the run status and the collaborators of the current run.
pub struct LifecycleController {
    settings: Config,
    factory: Arc<dyn MarketFactory>,
    publisher: Option<Arc<dyn Publisher>>,
    status: StatusHandle,
    running: Mutex<Option<Running>>,
}

impl LifecycleController {
    /// `settings` supplies the engine, telemetry and persistence sections;
    /// credentials and the analyzer document come with each `start`.
    pub fn new(settings: Config, factory: Arc<dyn MarketFactory>) -> Self {
        Self {
            settings,
            factory,
            publisher: None,
            status: StatusHandle::new(),
            running: Mutex::new(None),
        }
    }

    /// Publish telemetry through `publisher` instead of `telemetry.url`.
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    /// Validate the analyzer document, open collaborators and spawn the
    /// driver loop. An empty document runs with the default thresholds.
    pub async fn start(
        &self,
        api_key: &str,
        secret: &str,
        document: &str,
    ) -> Result<(), StartError> {
        let mut running = self.running.lock().await;

        let status = self.status.get();
        if status != Status::None || running.is_some() {
            return Err(StartError::InvalidStatus(status));
        }

        self.settings
            .engine
            .validate()
            .map_err(|e| StartError::InvalidConfig(format!("{:#}", e)))?;

        let analyzer = AnalyzerConfig::from_document(document)
            .and_then(|config| config.validate().map(|_| config))
            .map_err(|e| StartError::InvalidConfig(format!("{:#}", e)))?;

        let persistence = PersistenceManager::new(&self.settings.persistence.db_path)
            .map(Arc::new)
            .map_err(|e| StartError::PersistenceUnavailable(format!("{:#}", e)))?;

        let credentials = BinanceConfig {
            api_key: api_key.to_string(),
            secret_key: secret.to_string(),
            testnet: self.settings.binance.testnet,
        };
        let clients = self
            .factory
            .create(Market::Future, &credentials)
            .and_then(|future| Ok((future, self.factory.create(Market::Spot, &credentials)?)));
        let (future, spot) = match clients {
            Ok(clients) => clients,
            Err(e) => {
                if let Err(close_err) = persistence.close() {
                    warn!("Failed to close persistence: {:#}", close_err);
                }
                return Err(StartError::Market(format!("{:#}", e)));
            }
        };

        let publisher = self.connect_publisher().await;

        self.status
            .transition(Status::None, Status::Processing)
            .map_err(|_| StartError::InvalidStatus(self.status.get()))?;

        let engine = &self.settings.engine;
        let executor = LegExecutor::new(engine.retry.clone(), engine.leg_timeout())
            .with_persistence(persistence.clone());
        let coordinator =
            DualLegCoordinator::new(future.clone(), spot.clone(), executor, self.status.clone())
                .with_dry_run(engine.dry_run);
        let monitor = SpreadMonitor::new(
            future.clone(),
            spot.clone(),
            publisher.clone(),
            self.settings.telemetry.topic.clone(),
        );

        let pairs: Vec<AssetPair> = analyzer
            .areas
            .keys()
            .map(|asset| AssetPair::new(asset.as_str(), analyzer.quote.as_str()))
            .collect();
        let assets: Vec<&str> = analyzer.areas.keys().map(String::as_str).collect();
        info!(
            ?assets,
            dry_run = engine.dry_run,
            poll_interval_secs = engine.poll_interval_secs,
            "Hedger starting"
        );

        let ctx = CycleContext::new(Arc::new(analyzer), monitor, coordinator, self.status.clone());
        let driver = Driver {
            ctx,
            future: future.clone(),
            spot: spot.clone(),
            pairs,
            poll_interval: engine.poll_interval(),
            reconnect_delay: engine.reconnect_delay(),
        };
        let (shutdown, shutdown_rx) = oneshot::channel();
        let driver = tokio::spawn(driver.run(shutdown_rx));

        *running = Some(Running {
            future,
            spot,
            publisher,
            persistence,
            shutdown,
            driver,
        });

        Ok(())
    }

    async fn connect_publisher(&self) -> Arc<dyn Publisher> {
        if let Some(publisher) = &self.publisher {
            return publisher.clone();
        }

        match &self.settings.telemetry.url {
            Some(url) => match WebSocketPublisher::connect(url).await {
                Ok(publisher) => Arc::new(publisher),
                Err(e) => {
                    warn!("Telemetry unavailable, continuing without it: {:#}", e);
                    Arc::new(NullPublisher)
                }
            },
            None => Arc::new(NullPublisher),
        }
    }

    /// Force status None, stop the driver and close every collaborator.
    ///
    /// Failures are logged, never returned.
    pub async fn stop(&self) {
        let previous = self.status.reset();

        let Some(running) = self.running.lock().await.take() else {
            debug!(%previous, "Stop requested with nothing running");
            return;
        };

        let _ = running.shutdown.send(());
        if let Err(e) = running.driver.await {
            warn!("Driver task ended abnormally: {}", e);
        }

        for client in [&running.future, &running.spot] {
            if let Err(e) = client.close().await {
                warn!(market = %client.market(), "Failed to close market client: {:#}", e);
            }
        }
        if let Err(e) = running.publisher.close().await {
            warn!("Failed to close telemetry: {:#}", e);
        }
        if let Err(e) = running.persistence.close() {
            warn!("Failed to close persistence: {:#}", e);
        }

        info!(%previous, "Hedger stopped");
    }
}

/// The periodic loop of one run.
struct Driver {
    ctx: CycleContext,
    future: Arc<dyn MarketClient>,
    spot: Arc<dyn MarketClient>,
    pairs: Vec<AssetPair>,
    poll_interval: Duration,
    reconnect_delay: Duration,
}

impl Driver {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let (future_tx, mut future_events) = mpsc::channel(EVENT_BUFFER);
        let (spot_tx, mut spot_events) = mpsc::channel(EVENT_BUFFER);

        for (client, tx) in [(&self.future, &future_tx), (&self.spot, &spot_tx)] {
            if let Err(e) = client.start(tx.clone()).await {
                warn!(market = %client.market(), "Market start failed: {:#}", e);
            }
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Driver loop stopped");
                    break;
                }
                Some(event) = future_events.recv() => {
                    self.on_event(event, &self.future, &future_tx).await;
                }
                Some(event) = spot_events.recv() => {
                    self.on_event(event, &self.spot, &spot_tx).await;
                }
                _ = ticker.tick() => {
                    let status = self.ctx.status();
                    if !status.is_running() {
                        if status == Status::Error {
                            error!("Run is in error, driver loop exiting");
                        } else {
                            info!(%status, "Driver loop exiting");
                        }
                        break;
                    }
                    self.ctx.run_cycle().await;
                }
            }
        }
    }

    async fn on_event(
        &self,
        event: MarketEvent,
        client: &Arc<dyn MarketClient>,
        events: &mpsc::Sender<MarketEvent>,
    ) {
        match event {
            MarketEvent::Connected(market) => {
                for pair in &self.pairs {
                    if let Err(e) = client.subscribe_ticker(pair).await {
                        warn!(%market, %pair, "Ticker subscription failed: {:#}", e);
                    }
                }
                info!(%market, pairs = self.pairs.len(), "Tickers subscribed");
            }
            MarketEvent::Error(market, reason) => {
                warn!(%market, %reason, "Market error, reconnecting");
                let client = client.clone();
                let events = events.clone();
                let delay = self.reconnect_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // Driver gone: the run was stopped meanwhile
                    if events.is_closed() {
                        return;
                    }
                    if let Err(e) = client.start(events).await {
                        warn!(%market, "Reconnect failed: {:#}", e);
                    }
                });
            }
        }
    }
}
