//! Retrying event bus.
//!
//! Wraps one or more [`Transport`]s with per-channel circuit breakers, a
//! pending-message queue, and background retry processing with exponential
//! backoff. Delivery is at-least-once; consumers are assumed idempotent.
//!
//! ## Example
//!
//! ```rust,ignore
//! use crossbar_bus::{BusConfig, PublishOptions, RetryableEventBus, LocalTransport};
//! use std::sync::Arc;
//!
//! let bus = RetryableEventBus::new(BusConfig::default());
//! bus.register_transport(Arc::new(LocalTransport::new()));
//! bus.start()?;
//!
//! let delivered = bus
//!     .publish("booking.created", serde_json::json!({"id": 42}), PublishOptions::default())
//!     .await?;
//! ```

use crate::error::{BusError, BusResult};
use crate::message::{PendingMessage, PublishOptions};
use crate::strategy::{ErrorContext, ErrorStrategyChain, backoff_delay};
use crate::transport::Transport;
use crossbar_resilience::{
    CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry, CircuitBreakerStats,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Event bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Delay before the first retry of a failed message.
    pub initial_delay: Duration,
    /// Multiplier applied per retry attempt.
    pub backoff_factor: f64,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Retry budget for messages published without an explicit budget.
    pub default_max_retries: u32,
    /// How often the drain loop pulls due messages.
    pub processing_interval: Duration,
    /// How often the sweep loop promotes delayed messages that became due.
    pub retry_interval: Duration,
    /// Maximum messages pulled per drain tick.
    pub batch_size: usize,
    /// Maximum concurrent delivery attempts.
    pub max_concurrent: usize,
    /// Template for the per-channel circuit breakers.
    pub breaker: CircuitBreakerConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            default_max_retries: 5,
            processing_interval: Duration::from_millis(500),
            retry_interval: Duration::from_secs(1),
            batch_size: 10,
            max_concurrent: 5,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl BusConfig {
    /// Set the initial retry delay.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the backoff ceiling.
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    /// Set the default retry budget.
    pub fn default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Set the drain interval.
    pub fn processing_interval(mut self, interval: Duration) -> Self {
        self.processing_interval = interval;
        self
    }

    /// Set the sweep interval.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the per-tick batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the in-flight delivery cap.
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the per-channel breaker template.
    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}

/// Point-in-time bus health snapshot.
#[derive(Debug, Clone)]
pub struct BusStatus {
    /// Messages due and waiting for a drain tick.
    pub ready: usize,
    /// Messages waiting for their retry time.
    pub delayed: usize,
    /// Delivery attempts currently in flight.
    pub in_flight: usize,
    /// Whether background processing is paused.
    pub paused: bool,
    /// Whether background loops are running.
    pub running: bool,
    /// Health of every channel breaker.
    pub channels: Vec<CircuitBreakerStats>,
}

/// Event bus with breaker-protected delivery and background retries.
///
/// Cloning is cheap and shares all state; the background loops hold clones.
#[derive(Clone)]
pub struct RetryableEventBus {
    config: Arc<BusConfig>,
    transports: Arc<DashMap<String, Arc<dyn Transport>>>,
    routes: Arc<DashMap<String, Vec<String>>>,
    default_channel: Arc<RwLock<Option<String>>>,
    breakers: Arc<CircuitBreakerRegistry>,
    ready: Arc<Mutex<VecDeque<PendingMessage>>>,
    delayed: Arc<Mutex<Vec<PendingMessage>>>,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    chain: Arc<ErrorStrategyChain>,
    paused: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RetryableEventBus {
    /// Create a bus with the given configuration. Call
    /// [`register_transport`](Self::register_transport) before publishing and
    /// [`start`](Self::start) to enable background retries.
    pub fn new(config: BusConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config: Arc::new(config),
            transports: Arc::new(DashMap::new()),
            routes: Arc::new(DashMap::new()),
            default_channel: Arc::new(RwLock::new(None)),
            breakers: Arc::new(CircuitBreakerRegistry::new()),
            ready: Arc::new(Mutex::new(VecDeque::new())),
            delayed: Arc::new(Mutex::new(Vec::new())),
            permits,
            in_flight: Arc::new(AtomicUsize::new(0)),
            chain: Arc::new(ErrorStrategyChain::new()),
            paused: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The error-handling strategy chain consulted on delivery failures.
    pub fn strategies(&self) -> &ErrorStrategyChain {
        &self.chain
    }

    /// The per-channel breaker registry.
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Register a delivery channel. The first registered transport becomes
    /// the default channel for unrouted event types.
    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        let name = transport.name().to_string();
        info!(channel = %name, "Registering transport");
        self.default_channel.write().get_or_insert_with(|| name.clone());
        self.transports.insert(name, transport);
    }

    /// Route an event type over a specific set of channels. Every named
    /// channel must already be registered.
    pub fn configure_event_channels(
        &self,
        event_type: impl Into<String>,
        channels: impl IntoIterator<Item = impl Into<String>>,
    ) -> BusResult<()> {
        let event_type = event_type.into();
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        for channel in &channels {
            if !self.transports.contains_key(channel) {
                return Err(BusError::UnknownChannel(channel.clone()));
            }
        }
        debug!(event_type = %event_type, channels = ?channels, "Configured event channels");
        self.routes.insert(event_type, channels);
        Ok(())
    }

    /// Publish an event.
    ///
    /// With `immediate` (the default) the event is delivered now through the
    /// breaker-protected channels; `Ok(true)` means every configured channel
    /// accepted it. On failure (or when deferred) the event joins the retry
    /// queue and the call returns `Ok(false)`. Only misuse (no transports
    /// registered, an unknown channel) returns an error.
    pub async fn publish(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        options: PublishOptions,
    ) -> BusResult<bool> {
        let channels = self.channels_for(event_type)?;

        if options.immediate {
            match self.deliver(event_type, &payload, &channels).await {
                Ok(()) => {
                    debug!(event_type, "Event delivered");
                    return Ok(true);
                }
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => {
                    self.enqueue_failed(event_type, payload, &options, Some(e)).await;
                    return Ok(false);
                }
            }
        }

        self.enqueue_failed(event_type, payload, &options, None).await;
        Ok(false)
    }

    /// Start the background sweep and drain loops.
    pub fn start(&self) -> BusResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BusError::AlreadyRunning);
        }
        info!(
            processing_interval = ?self.config.processing_interval,
            retry_interval = ?self.config.retry_interval,
            "Event bus started"
        );

        let sweeper = {
            let bus = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(bus.config.retry_interval);
                loop {
                    tick.tick().await;
                    if !bus.running.load(Ordering::SeqCst) {
                        break;
                    }
                    if !bus.paused.load(Ordering::SeqCst) {
                        bus.sweep_due();
                    }
                }
            })
        };

        let drainer = {
            let bus = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(bus.config.processing_interval);
                loop {
                    tick.tick().await;
                    if !bus.running.load(Ordering::SeqCst) {
                        break;
                    }
                    if !bus.paused.load(Ordering::SeqCst) {
                        bus.drain_ready().await;
                    }
                }
            })
        };

        self.tasks.lock().extend([sweeper, drainer]);
        Ok(())
    }

    /// Stop the background loops. Queued messages are kept; in-flight
    /// attempts run to completion.
    pub fn shutdown(&self) -> BusResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(BusError::NotRunning);
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("Event bus stopped");
        Ok(())
    }

    /// Whether background loops are running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop scheduling new work without discarding queued state.
    pub fn pause_processing(&self) {
        info!("Event bus processing paused");
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resume background processing.
    pub fn resume_processing(&self) {
        info!("Event bus processing resumed");
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Whether processing is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Queue depth across ready and delayed messages.
    pub fn queue_depth(&self) -> usize {
        let ready = self.ready.lock().len();
        let delayed = self.delayed.lock().len();
        ready + delayed
    }

    /// Snapshot of every queued message, for inspection.
    pub fn pending(&self) -> Vec<PendingMessage> {
        let mut messages: Vec<PendingMessage> = self.ready.lock().iter().cloned().collect();
        messages.extend(self.delayed.lock().iter().cloned());
        messages
    }

    /// Point-in-time health snapshot.
    pub fn status(&self) -> BusStatus {
        let ready = self.ready.lock().len();
        let delayed = self.delayed.lock().len();
        BusStatus {
            ready,
            delayed,
            in_flight: self.in_flight.load(Ordering::SeqCst),
            paused: self.is_paused(),
            running: self.is_running(),
            channels: self.breakers.stats(),
        }
    }

    fn channels_for(&self, event_type: &str) -> BusResult<Vec<String>> {
        if let Some(route) = self.routes.get(event_type) {
            return Ok(route.clone());
        }
        match self.default_channel.read().clone() {
            Some(channel) => Ok(vec![channel]),
            None => Err(BusError::NoTransports),
        }
    }

    /// Attempt delivery over every configured channel. All channels are
    /// attempted even when an earlier one fails; the first failure is
    /// reported.
    async fn deliver(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
        channels: &[String],
    ) -> BusResult<()> {
        let mut failure: Option<BusError> = None;

        for channel in channels {
            let Some(transport) = self.transports.get(channel).map(|t| t.clone()) else {
                return Err(BusError::UnknownChannel(channel.clone()));
            };
            let breaker = self
                .breakers
                .get_or_create(channel, self.config.breaker.clone());

            let result = breaker.execute(|| transport.send(event_type, payload)).await;
            let error = match result {
                Ok(()) => continue,
                Err(CircuitBreakerError::Open) | Err(CircuitBreakerError::ProbeLimitReached) => {
                    BusError::CircuitOpen(channel.clone())
                }
                Err(CircuitBreakerError::Timeout(_)) => BusError::Timeout(channel.clone()),
                Err(CircuitBreakerError::Execution(e)) => BusError::Delivery {
                    channel: channel.clone(),
                    reason: e.to_string(),
                },
            };
            debug!(event_type, channel = %channel, error = %error, "Channel delivery failed");
            failure.get_or_insert(error);
        }

        match failure {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    async fn enqueue_failed(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        options: &PublishOptions,
        error: Option<BusError>,
    ) {
        let max_retries = options.max_retries.unwrap_or(self.config.default_max_retries);
        let message = PendingMessage::new(
            event_type,
            payload,
            max_retries,
            self.config.initial_delay,
        )
        .with_metadata(options.metadata.clone());

        match error {
            Some(error) => {
                warn!(
                    event_type,
                    correlation_id = %message.correlation_id,
                    error = %error,
                    "Immediate delivery failed, queueing for retry"
                );
                let ctx = ErrorContext::from(&message);
                self.chain.handle(&error, event_type, &ctx).await;
                if message.retries_exhausted() {
                    return;
                }
            }
            None => {
                debug!(
                    event_type,
                    correlation_id = %message.correlation_id,
                    "Deferred publish queued"
                );
            }
        }

        self.delayed.lock().push(message);
    }

    /// Move delayed messages that became due into the ready queue.
    pub(crate) fn sweep_due(&self) {
        let mut delayed = self.delayed.lock();
        if delayed.is_empty() {
            return;
        }
        let mut ready = self.ready.lock();
        let mut i = 0;
        while i < delayed.len() {
            if delayed[i].is_due() {
                ready.push_back(delayed.swap_remove(i));
            } else {
                i += 1;
            }
        }
    }

    /// Pull one batch of ready messages and attempt redelivery, bounded by
    /// the in-flight cap. Returns once the batch has settled.
    pub(crate) async fn drain_ready(&self) {
        let batch: Vec<PendingMessage> = {
            let mut ready = self.ready.lock();
            let n = self.config.batch_size.min(ready.len());
            ready.drain(..n).collect()
        };
        if batch.is_empty() {
            return;
        }

        let mut attempts = Vec::with_capacity(batch.len());
        for message in batch {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            let bus = self.clone();
            bus.in_flight.fetch_add(1, Ordering::SeqCst);
            attempts.push(tokio::spawn(async move {
                bus.attempt_redelivery(message).await;
                bus.in_flight.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            }));
        }
        for attempt in attempts {
            let _ = attempt.await;
        }
    }

    async fn attempt_redelivery(&self, mut message: PendingMessage) {
        let channels = match self.channels_for(&message.event_type) {
            Ok(channels) => channels,
            Err(e) => {
                // Configuration errors are never retried.
                warn!(
                    event_type = %message.event_type,
                    correlation_id = %message.correlation_id,
                    error = %e,
                    "Dropping unroutable message"
                );
                let ctx = ErrorContext::from(&message);
                self.chain.handle(&e, &message.event_type, &ctx).await;
                return;
            }
        };

        match self
            .deliver(&message.event_type, &message.payload, &channels)
            .await
        {
            Ok(()) => {
                info!(
                    event_type = %message.event_type,
                    correlation_id = %message.correlation_id,
                    retry_count = message.retry_count,
                    "Queued message delivered"
                );
            }
            Err(error) => {
                let delay = backoff_delay(
                    self.config.initial_delay,
                    self.config.backoff_factor,
                    message.retry_count + 1,
                    self.config.max_delay,
                );
                message.record_failed_attempt(delay);

                let ctx = ErrorContext::from(&message);
                let handled = self.chain.handle(&error, &message.event_type, &ctx).await;

                if message.retries_exhausted() {
                    warn!(
                        event_type = %message.event_type,
                        correlation_id = %message.correlation_id,
                        retry_count = message.retry_count,
                        handled,
                        "Retries exhausted, message leaves the queue"
                    );
                } else {
                    debug!(
                        event_type = %message.event_type,
                        correlation_id = %message.correlation_id,
                        retry_count = message.retry_count,
                        next_retry_at = %message.next_retry_at,
                        "Retry scheduled"
                    );
                    self.delayed.lock().push(message);
                }
            }
        }
    }
}
