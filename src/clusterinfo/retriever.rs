//! Cluster info retriever — background refresh loop plus fan-out.
//!
//! ```text
//! run(token) ──► spawn refresh task ──► wait ≤ initial_timeout for first fetch
//!                      │
//!                      ├─► fetch #1 (no deadline) ─► cache.replace ─► broadcast ─► Running
//!                      │
//!                      └─► loop {
//!                            tick (fixed grid, a late tick fires once then realigns)
//!                            fetch ─► cache.replace ─► broadcast
//!                          } until token cancelled ─► Stopped
//! ```
//!
//! Exactly one task belongs to the loop and fetches never overlap: the
//! next tick is only awaited after the previous fetch has been applied.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cache::{Cache, CacheEntry};
use super::consumer::{Consumer, ConsumerRegistry};
use super::error::{FetchError, RegistrationError, RunError, StartupError};
use super::fetcher::{ClusterInfoSource, HttpFetcher};
use super::metrics::ClusterInfoCollector;
use super::types::ClusterInfo;

/// How long `run` waits for the first fetch before reporting a timeout.
pub const DEFAULT_INITIAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieverConfig {
    /// Period between refreshes once running
    pub refresh_interval: Duration,
    /// Upper bound on how long `run` blocks its caller
    pub initial_timeout: Duration,
}

impl RetrieverConfig {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            refresh_interval,
            initial_timeout: DEFAULT_INITIAL_TIMEOUT,
        }
    }
}

// ── Loop state ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    NotStarted = 0,
    AwaitingInitial = 1,
    Running = 2,
    Stopped = 3,
}

#[derive(Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> LoopState {
        match self.0.load(Ordering::Acquire) {
            0 => LoopState::NotStarted,
            1 => LoopState::AwaitingInitial,
            2 => LoopState::Running,
            _ => LoopState::Stopped,
        }
    }

    fn set(&self, state: LoopState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

// ── Retriever ───────────────────────────────────────────────────────

/// Periodically fetches cluster info, caches it and pushes it to
/// registered consumers.
pub struct Retriever {
    source: Result<Arc<dyn ClusterInfoSource>, StartupError>,
    cache: Arc<Cache>,
    consumers: Arc<ConsumerRegistry>,
    config: RetrieverConfig,
    state: Arc<StateCell>,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Retriever {
    /// Retriever backed by `GET <base_url>/`.
    ///
    /// An unusable `base_url` is not reported here but by `run`, as a
    /// `RunError::Startup`.
    pub fn new(base_url: &str, http_timeout: Duration, refresh_interval: Duration) -> Self {
        let source = HttpFetcher::new(base_url, http_timeout)
            .map(|f| Arc::new(f) as Arc<dyn ClusterInfoSource>);
        Self::build(source, RetrieverConfig::new(refresh_interval))
    }

    pub fn with_source(source: Arc<dyn ClusterInfoSource>, config: RetrieverConfig) -> Self {
        Self::build(Ok(source), config)
    }

    fn build(
        source: Result<Arc<dyn ClusterInfoSource>, StartupError>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            source,
            cache: Arc::new(Cache::new()),
            consumers: Arc::new(ConsumerRegistry::new()),
            config,
            state: Arc::new(StateCell::default()),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn with_initial_timeout(mut self, initial_timeout: Duration) -> Self {
        self.config.initial_timeout = initial_timeout;
        self
    }

    pub fn config(&self) -> RetrieverConfig {
        self.config
    }

    pub fn state(&self) -> LoopState {
        self.state.get()
    }

    pub fn cache(&self) -> Arc<Cache> {
        Arc::clone(&self.cache)
    }

    /// Current cache snapshot.
    pub fn current(&self) -> Arc<CacheEntry> {
        self.cache.get()
    }

    /// Prometheus view of the cache.
    pub fn collector(&self) -> prometheus::Result<ClusterInfoCollector> {
        ClusterInfoCollector::new(Arc::clone(&self.cache))
    }

    /// Register a consumer. Allowed before and after `run`, from within
    /// the tokio runtime.
    ///
    /// If the cache already holds an entry it is queued for the consumer
    /// before this call returns, ahead of any later refresh.
    pub fn register_consumer(&self, consumer: Arc<dyn Consumer>) -> Result<(), RegistrationError> {
        let name = consumer.name().to_string();
        self.consumers.register(consumer, &self.cache)?;
        info!(consumer = %name, "Registered cluster info consumer");
        Ok(())
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Start the refresh loop and wait (bounded) for the first fetch.
    ///
    /// Returns `Ok` once the first fetch has been applied, whether it
    /// succeeded or not. `InitialCallTimeout` means the first fetch is
    /// still outstanding; the loop keeps going and applies it later.
    /// May only be called once.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), RunError> {
        let source = self.source.clone()?;
        if self.config.refresh_interval.is_zero() {
            return Err(StartupError {
                endpoint: source.endpoint().to_string(),
                reason: "refresh interval must be greater than zero".into(),
            }
            .into());
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(RunError::AlreadyStarted);
        }

        self.state.set(LoopState::AwaitingInitial);
        let (ready_tx, ready_rx) = oneshot::channel();
        let refresh = RefreshLoop {
            source,
            cache: Arc::clone(&self.cache),
            consumers: Arc::clone(&self.consumers),
            interval: self.config.refresh_interval,
            state: Arc::clone(&self.state),
        };
        let handle = tokio::spawn(refresh.run(cancel, ready_tx));
        *self.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);

        match time::timeout(self.config.initial_timeout, ready_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                debug!("Cluster info retriever stopped before the initial call finished");
                Ok(())
            }
            Err(_) => Err(RunError::InitialCallTimeout(self.config.initial_timeout)),
        }
    }

    /// Wait for the refresh task to finish. Returns immediately if it was
    /// never started or has already been awaited.
    pub async fn wait(&self) {
        let handle = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Cluster info refresh task failed: {}", e);
            }
        }
    }
}

// ── Refresh loop ────────────────────────────────────────────────────

struct RefreshLoop {
    source: Arc<dyn ClusterInfoSource>,
    cache: Arc<Cache>,
    consumers: Arc<ConsumerRegistry>,
    interval: Duration,
    state: Arc<StateCell>,
}

impl RefreshLoop {
    async fn run(self, cancel: CancellationToken, ready: oneshot::Sender<()>) {
        info!(
            endpoint = %self.source.endpoint(),
            interval = ?self.interval,
            "Cluster info retriever starting"
        );

        let initial = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.source.fetch() => Some(result),
        };
        let Some(initial) = initial else {
            self.stop();
            return;
        };
        self.apply(initial);
        self.state.set(LoopState::Running);
        // The caller may have given up waiting; that is fine.
        let _ = ready.send(());

        // Ticks stay on the grid anchored at the first apply. A fetch that
        // overruns gets one immediate tick, then the grid resumes.
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.source.fetch() => result,
            };
            if cancel.is_cancelled() {
                break;
            }
            self.apply(result);
        }

        self.stop();
    }

    fn apply(&self, result: Result<ClusterInfo, FetchError>) {
        if let Err(e) = &result {
            warn!(
                endpoint = %self.source.endpoint(),
                kind = e.kind(),
                "Failed to retrieve cluster info: {}",
                e
            );
        }

        let entry = self.cache.replace(result);
        if entry.last_error.is_none() {
            if let Some(doc) = &entry.document {
                debug!(
                    cluster = %doc.cluster_name,
                    es_version = %doc.version.number,
                    version = entry.version,
                    "Cluster info updated"
                );
            }
        }

        self.consumers.broadcast(&entry);
    }

    fn stop(&self) {
        self.state.set(LoopState::Stopped);
        info!("Cluster info retriever stopped");
    }
}
