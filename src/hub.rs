//! Central orchestrator for all connected toys.
//!
//! The hub owns the engine, the registry of live controllers and the 50 ms
//! communication loop that drains command queues, advances patterns and
//! polls batteries. It also handles the lifecycle edges: unexpected
//! disconnects (one bounded reconnect attempt) and physical power-off.
//!
//! Registry locks are held only for bookkeeping, never across I/O; every
//! tick works on a snapshot so one slow toy cannot stall the fleet.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::domain::controller::ToyController;
use crate::domain::models::ToyInfo;
use crate::engine::{Engine, RecurringTask};
use crate::error::{Error, Result};
use crate::infrastructure::bluetooth::connector::LovenseConnector;
use crate::infrastructure::bluetooth::session::{LovenseToy, Toy};
use crate::infrastructure::cache::ModelCache;
use crate::infrastructure::transport::{BleScanner, DisconnectListener};

/// Seconds between automatic battery polls.
pub const BATTERY_UPDATE_INTERVAL: Duration = Duration::from_secs(120);
/// Communication loop frequency.
pub const COMMUNICATION_FPS: u64 = 20;

const TICK_INTERVAL: Duration = Duration::from_millis(1000 / COMMUNICATION_FPS);
const RECONNECT_GRACE: Duration = Duration::from_secs(1);
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const BACKGROUND_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Battery snapshot consumer: toy id to level, `None` where the query failed.
pub type BatteryConsumer = Arc<dyn Fn(HashMap<String, Option<u8>>) + Send + Sync>;
/// Consumer for per-toy lifecycle events; receives the toy id.
pub type ToyEventConsumer = Arc<dyn Fn(&str) + Send + Sync>;
/// Consumer for failures the hub could not handle locally.
pub type ErrorConsumer = Arc<dyn Fn(&anyhow::Error, &str) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Model-name cache location; `None` keeps the cache in memory only.
    pub cache_path: Option<PathBuf>,
    /// Model name reported for toys the cache has never seen.
    pub default_model: String,
}

#[derive(Default)]
struct Consumers {
    battery: Mutex<Option<BatteryConsumer>>,
    error: Mutex<Option<ErrorConsumer>>,
    disconnect: Mutex<Option<ToyEventConsumer>>,
    reconnect_failure: Mutex<Option<ToyEventConsumer>>,
    reconnect_success: Mutex<Option<ToyEventConsumer>>,
    power_off: Mutex<Option<ToyEventConsumer>>,
}

pub struct ToyHub {
    inner: Arc<HubInner>,
    connector: Arc<LovenseConnector>,
}

struct HubInner {
    engine: Engine,
    cache: ModelCache,
    controllers: Mutex<HashMap<String, Arc<ToyController>>>,
    last_battery_poll: Mutex<Instant>,
    tick_loop: Mutex<Option<RecurringTask>>,
    consumers: Consumers,
    connector: OnceLock<Arc<LovenseConnector>>,
}

impl ToyHub {
    pub fn new(scanner: Arc<dyn BleScanner>, config: HubConfig) -> Result<Self> {
        let engine = Engine::new()?;
        let inner = Arc::new(HubInner {
            engine,
            cache: ModelCache::new(config.cache_path, config.default_model),
            controllers: Mutex::new(HashMap::new()),
            last_battery_poll: Mutex::new(Instant::now()),
            tick_loop: Mutex::new(None),
            consumers: Consumers::default(),
            connector: OnceLock::new(),
        });

        let disconnect_inner = Arc::downgrade(&inner);
        let on_unexpected_disconnect: DisconnectListener = Arc::new(move |address: &str| {
            if let Some(inner) = disconnect_inner.upgrade() {
                inner.handle_unexpected_disconnect(address);
            }
        });
        let power_off_inner = Arc::downgrade(&inner);
        let on_power_off: Arc<dyn Fn(&str) + Send + Sync> = Arc::new(move |address: &str| {
            if let Some(inner) = power_off_inner.upgrade() {
                inner.handle_power_off(address);
            }
        });

        let connector = Arc::new(LovenseConnector::new(
            scanner,
            on_unexpected_disconnect,
            on_power_off,
        ));
        let _ = inner.connector.set(connector.clone());

        Ok(Self { inner, connector })
    }

    /// Whether the communication loop is currently running. It starts with
    /// the first registered toy and stops with the last.
    pub fn is_running(&self) -> bool {
        self.inner.tick_loop.lock().unwrap().is_some()
    }

    // ------------------------------------------------------------------
    // Consumers
    // ------------------------------------------------------------------

    pub fn set_on_battery_update(&self, consumer: Option<BatteryConsumer>) {
        *self.inner.consumers.battery.lock().unwrap() = consumer;
    }

    pub fn set_on_error(&self, consumer: Option<ErrorConsumer>) {
        *self.inner.consumers.error.lock().unwrap() = consumer;
    }

    pub fn set_on_disconnect(&self, consumer: Option<ToyEventConsumer>) {
        *self.inner.consumers.disconnect.lock().unwrap() = consumer;
    }

    pub fn set_on_reconnection_failure(&self, consumer: Option<ToyEventConsumer>) {
        *self.inner.consumers.reconnect_failure.lock().unwrap() = consumer;
    }

    pub fn set_on_reconnection_success(&self, consumer: Option<ToyEventConsumer>) {
        *self.inner.consumers.reconnect_success.lock().unwrap() = consumer;
    }

    pub fn set_on_power_off(&self, consumer: Option<ToyEventConsumer>) {
        *self.inner.consumers.power_off.lock().unwrap() = consumer;
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Scan for toys, blocking the caller. Model names are filled from the
    /// cache where the toy has been seen before.
    pub fn discover_toys_blocking(&self, timeout: Duration) -> Result<Vec<ToyInfo>> {
        info!("starting toy discovery (blocking)");
        let connector = self.connector.clone();
        let mut records = self
            .inner
            .engine
            .call(async move { connector.discover(timeout).await }, Some(timeout * 2))??;
        for record in &mut records {
            record.model_name = self.inner.cache.get(&record.name);
        }
        info!("discovered {} toy(s)", records.len());
        Ok(records)
    }

    /// Scan for toys in the background and deliver the outcome to the
    /// callback.
    pub fn discover_toys_callback(
        &self,
        on_discovered: impl FnOnce(Result<Vec<ToyInfo>>) + Send + 'static,
        timeout: Duration,
    ) {
        info!("starting toy discovery (callback)");
        let connector = self.connector.clone();
        let inner = self.inner.clone();
        self.inner.engine.call_with_callback(
            async move { connector.discover(timeout).await },
            move |outcome| {
                let result = match outcome {
                    Ok(Ok(mut records)) => {
                        for record in &mut records {
                            record.model_name = inner.cache.get(&record.name);
                        }
                        info!("discovered {} toy(s)", records.len());
                        Ok(records)
                    }
                    Ok(Err(error)) => Err(error),
                    Err(engine_error) => Err(engine_error.into()),
                };
                on_discovered(result);
            },
            Some(timeout * 2),
        );
    }

    // ------------------------------------------------------------------
    // Connect / disconnect
    // ------------------------------------------------------------------

    /// Connect every record concurrently, blocking the caller. Each entry in
    /// the result corresponds to the input record at the same index; records
    /// that fail (validation, transport) do not affect their neighbors.
    /// Successful toys are registered and start ticking immediately.
    pub fn connect_toys_blocking(
        &self,
        to_connect: &[ToyInfo],
        timeout: Duration,
    ) -> Result<Vec<Result<Arc<ToyController>>>> {
        info!("connecting to {} toy(s) (blocking)", to_connect.len());
        let connector = self.connector.clone();
        let records = to_connect.to_vec();
        let outcomes = self
            .inner
            .engine
            .call(async move { connector.create_toys(&records).await }, Some(timeout))?;
        let adopted = self.inner.adopt_sessions(to_connect, outcomes);
        info!("connection process finished");
        Ok(adopted)
    }

    /// Non-blocking variant of [`Self::connect_toys_blocking`].
    pub fn connect_toys_callback(
        &self,
        to_connect: &[ToyInfo],
        on_connected: impl FnOnce(Result<Vec<Result<Arc<ToyController>>>>) + Send + 'static,
        timeout: Duration,
    ) {
        info!("connecting to {} toy(s) (callback)", to_connect.len());
        let connector = self.connector.clone();
        let records = to_connect.to_vec();
        let adopt_records = to_connect.to_vec();
        let inner = self.inner.clone();
        self.inner.engine.call_with_callback(
            async move { connector.create_toys(&records).await },
            move |outcome| {
                let result = match outcome {
                    Ok(outcomes) => {
                        let adopted = inner.adopt_sessions(&adopt_records, outcomes);
                        info!("connection process finished");
                        Ok(adopted)
                    }
                    Err(engine_error) => Err(engine_error.into()),
                };
                on_connected(result);
            },
            Some(timeout),
        );
    }

    /// Disconnect the given toys, blocking the caller. Unknown ids produce an
    /// [`Error::UnknownToy`] at their position; known toys are unregistered
    /// immediately and torn down in parallel, best-effort.
    pub fn disconnect_toys_blocking(
        &self,
        to_disconnect: &[String],
        timeout: Duration,
    ) -> Result<Vec<Result<()>>> {
        if to_disconnect.is_empty() {
            return Ok(Vec::new());
        }
        info!("disconnecting from {} toy(s) (blocking)", to_disconnect.len());
        let tasks = self.inner.teardown_tasks(to_disconnect);
        let outcomes = self.inner.engine.call_parallel(tasks, Some(timeout))?;
        Ok(outcomes
            .into_iter()
            .map(|outcome| match outcome {
                Ok(result) => result,
                Err(engine_error) => Err(engine_error.into()),
            })
            .collect())
    }

    /// Non-blocking variant of [`Self::disconnect_toys_blocking`].
    pub fn disconnect_toys_callback(
        &self,
        to_disconnect: &[String],
        on_disconnected: impl FnOnce(Result<Vec<Result<()>>>) + Send + 'static,
        timeout: Duration,
    ) {
        info!("disconnecting from {} toy(s) (callback)", to_disconnect.len());
        let tasks = self.inner.teardown_tasks(to_disconnect);
        self.inner.engine.call_with_callback(
            async move { join_all(tasks).await },
            move |outcome| {
                let result = match outcome {
                    Ok(results) => Ok(results),
                    Err(engine_error) => Err(engine_error.into()),
                };
                on_disconnected(result);
            },
            Some(timeout),
        );
    }

    /// Change the model assigned to a connected toy.
    ///
    /// The cache entry for the toy's Bluetooth name is written first and is
    /// deliberately not rolled back if validation rejects the name: the most
    /// recently *intended* assignment is kept for the next discovery.
    pub fn update_model_name(&self, toy_id: &str, model_name: &str) -> Result<Arc<ToyController>> {
        let controller = self
            .inner
            .controllers
            .lock()
            .unwrap()
            .get(toy_id)
            .cloned()
            .ok_or_else(|| Error::UnknownToy(toy_id.to_string()))?;
        let toy = controller.toy();
        self.inner.cache.update(HashMap::from([(
            toy.name().to_string(),
            model_name.to_string(),
        )]));
        toy.set_model_name(model_name)?;
        info!("updated model name for toy {toy_id} to {model_name}");
        Ok(controller)
    }

    /// Stop the loop, disconnect everything and shut the engine down. Call
    /// before dropping the hub; the instance is unusable afterwards.
    pub fn shutdown(&self) {
        info!("shutting down toy hub");
        if let Some(task) = self.inner.tick_loop.lock().unwrap().take() {
            task.cancel();
        }
        let ids: Vec<String> = self
            .inner
            .controllers
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        if !ids.is_empty() {
            match self.disconnect_toys_blocking(&ids, SHUTDOWN_DISCONNECT_TIMEOUT) {
                Ok(results) => {
                    for error in results.into_iter().filter_map(|result| result.err()) {
                        error!("error while disconnecting a toy during shutdown: {error}");
                    }
                }
                Err(error) => error!("shutdown disconnect batch failed: {error}"),
            }
        }
        self.inner.engine.shutdown();
        info!("toy hub shutdown complete");
    }
}

impl HubInner {
    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    fn register(self: &Arc<Self>, toy_id: &str, controller: Arc<ToyController>) {
        let total = {
            let mut controllers = self.controllers.lock().unwrap();
            controller.set_connected(true);
            controllers.insert(toy_id.to_string(), controller);
            controllers.len()
        };
        if total == 1 {
            self.start_tick_loop();
        }
        // Rewind the poll clock so the next tick reads the newcomer's battery
        // right away instead of waiting out the interval.
        *self.last_battery_poll.lock().unwrap() = Instant::now()
            .checked_sub(BATTERY_UPDATE_INTERVAL)
            .unwrap_or_else(Instant::now);
        debug!("registered toy {toy_id} ({total} total)");
    }

    fn unregister(&self, toy_id: &str) {
        let remaining = {
            let mut controllers = self.controllers.lock().unwrap();
            let Some(controller) = controllers.remove(toy_id) else {
                return;
            };
            controller.set_connected(false);
            controllers.len()
        };
        if remaining == 0 {
            self.stop_tick_loop();
        }
        debug!("unregistered toy {toy_id} ({remaining} remaining)");
    }

    fn adopt_sessions(
        self: &Arc<Self>,
        records: &[ToyInfo],
        outcomes: Vec<Result<Arc<LovenseToy>>>,
    ) -> Vec<Result<Arc<ToyController>>> {
        let mut cache_updates = HashMap::new();
        let mut adopted = Vec::with_capacity(outcomes.len());
        for (record, outcome) in records.iter().zip(outcomes) {
            match outcome {
                Ok(toy) => {
                    let toy: Arc<dyn Toy> = toy;
                    let controller =
                        Arc::new(ToyController::new(toy.clone(), record.toy_id.clone()));
                    self.register(&record.toy_id, controller.clone());
                    cache_updates.insert(record.name.clone(), toy.model_name());
                    adopted.push(Ok(controller));
                }
                Err(error) => adopted.push(Err(error)),
            }
        }
        if !cache_updates.is_empty() {
            self.cache.update(cache_updates);
        }
        adopted
    }

    /// Build one teardown future per id, preserving input order. Lookup and
    /// unregistration happen here, synchronously; the returned futures only
    /// carry the transport teardown.
    fn teardown_tasks(&self, to_disconnect: &[String]) -> Vec<BoxFuture<'static, Result<()>>> {
        to_disconnect
            .iter()
            .map(|toy_id| {
                let controller = self.controllers.lock().unwrap().get(toy_id).cloned();
                match controller {
                    Some(controller) => {
                        self.unregister(toy_id);
                        let toy = controller.toy();
                        async move {
                            toy.disconnect().await;
                            Ok(())
                        }
                        .boxed()
                    }
                    None => {
                        warn!("attempted to disconnect unknown toy {toy_id}");
                        let toy_id = toy_id.clone();
                        async move { Err(Error::UnknownToy(toy_id)) }.boxed()
                    }
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Communication loop
    // ------------------------------------------------------------------

    fn start_tick_loop(self: &Arc<Self>) {
        let mut slot = self.tick_loop.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let scheduled = self.engine.schedule_recurring(
            move || {
                let weak: Weak<HubInner> = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return Ok(());
                    };
                    if let Err(error) = inner.tick().await {
                        inner.report_error(&error, "communication loop error");
                    }
                    Ok(())
                }
            },
            TICK_INTERVAL,
        );
        match scheduled {
            Ok(task) => {
                *slot = Some(task);
                debug!("communication loop started");
            }
            Err(error) => error!("could not start communication loop: {error}"),
        }
    }

    fn stop_tick_loop(&self) {
        if let Some(task) = self.tick_loop.lock().unwrap().take() {
            task.cancel();
            debug!("communication loop stopped");
        }
    }

    /// One frame: snapshot the registry, poll batteries when due, then run
    /// every controller's queue drain and pattern tick concurrently.
    async fn tick(&self) -> anyhow::Result<()> {
        let controllers: Vec<Arc<ToyController>> = {
            let controllers = self.controllers.lock().unwrap();
            if controllers.is_empty() {
                return Ok(());
            }
            controllers.values().cloned().collect()
        };

        let battery_consumer = self.consumers.battery.lock().unwrap().clone();
        if let Some(consumer) = battery_consumer {
            let due = self.last_battery_poll.lock().unwrap().elapsed() >= BATTERY_UPDATE_INTERVAL;
            if due {
                info!("updating battery levels");
                *self.last_battery_poll.lock().unwrap() = Instant::now();
                let queries = controllers.iter().map(|controller| {
                    let toy = controller.toy();
                    let toy_id = controller.toy_id().to_string();
                    async move { (toy_id, toy.get_battery_level().await) }
                });
                let levels: HashMap<String, Option<u8>> =
                    join_all(queries).await.into_iter().collect();
                consumer(levels);
            }
        }

        join_all(
            controllers
                .iter()
                .map(|controller| controller.process_communication()),
        )
        .await;
        Ok(())
    }

    fn report_error(&self, error: &anyhow::Error, context: &str) {
        let consumer = self.consumers.error.lock().unwrap().clone();
        match consumer {
            Some(consumer) => consumer(error, context),
            None => error!("{context}: {error:#}"),
        }
    }

    fn notify(consumer: &Mutex<Option<ToyEventConsumer>>, toy_id: &str) {
        let consumer = consumer.lock().unwrap().clone();
        if let Some(consumer) = consumer {
            consumer(toy_id);
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle edges
    // ------------------------------------------------------------------

    /// Transport lost the link without the caller asking for it: unregister,
    /// tell the disconnect consumer, then make exactly one reconnect attempt
    /// after a short grace period.
    fn handle_unexpected_disconnect(self: &Arc<Self>, address: &str) {
        warn!("toy at {address} disconnected unexpectedly, will attempt to reconnect once");
        let controller = self.controllers.lock().unwrap().get(address).cloned();
        let Some(controller) = controller else {
            warn!("disconnect signal for unregistered toy {address}");
            return;
        };
        self.unregister(address);
        Self::notify(&self.consumers.disconnect, address);

        let toy = controller.toy();
        let attempt = {
            let toy = toy.clone();
            async move {
                // Give the link a moment to settle before the one retry.
                tokio::time::sleep(RECONNECT_GRACE).await;
                toy.reconnect_transport().await
            }
        };
        let inner = self.clone();
        let toy_id = address.to_string();
        self.engine.call_with_callback(
            attempt,
            move |outcome| match outcome {
                Ok(Ok(())) => {
                    info!("reconnection successful for {toy_id}");
                    if let Some(connector) = inner.connector.get() {
                        connector.mark_live(&toy_id, toy);
                    }
                    inner.register(&toy_id, controller);
                    Self::notify(&inner.consumers.reconnect_success, &toy_id);
                }
                Ok(Err(error)) => {
                    error!("unable to recover connection to toy at {toy_id}: {error}");
                    Self::notify(&inner.consumers.reconnect_failure, &toy_id);
                    inner.background_disconnect(toy);
                }
                Err(engine_error) => {
                    error!("reconnect attempt for {toy_id} did not finish: {engine_error}");
                    Self::notify(&inner.consumers.reconnect_failure, &toy_id);
                    inner.background_disconnect(toy);
                }
            },
            Some(RECONNECT_TIMEOUT),
        );
    }

    /// The toy announced a physical power-off. The consumer is notified
    /// exactly once; the transport teardown happens in the background.
    fn handle_power_off(self: &Arc<Self>, address: &str) {
        warn!("toy at {address} was powered off");
        let controller = self.controllers.lock().unwrap().get(address).cloned();
        let Some(controller) = controller else {
            return;
        };
        self.unregister(address);
        Self::notify(&self.consumers.power_off, address);
        self.background_disconnect(controller.toy());
    }

    fn background_disconnect(&self, toy: Arc<dyn Toy>) {
        self.engine.call_with_callback(
            async move { toy.disconnect().await },
            |outcome| {
                if let Err(error) = outcome {
                    warn!("background disconnect did not finish: {error}");
                }
            },
            Some(BACKGROUND_DISCONNECT_TIMEOUT),
        );
    }
}
