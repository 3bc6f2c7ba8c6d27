//! Consumer registry — push delivery of cache entries to interested
//! components.
//!
//! ```text
//! broadcast(entry)
//!     │
//!     ├──► [queue 1] ──► worker 1 ──► spawn_blocking(consumer1.update)
//!     │    (bounded)
//!     └──► [queue N] ──► worker N ──► spawn_blocking(consumerN.update)
//!          (bounded)
//! ```
//!
//! Each registration is a slot with its own bounded queue and worker
//! task. `broadcast` only enqueues (`try_send`), so a slow, failing or
//! panicking consumer never holds up the refresh loop. A slot remembers
//! the last `sequence` it queued; registration and broadcast share one
//! lock, so every slot sees entries in order, without gaps from its
//! registration point on, and never twice. A consumer whose queue is
//! full misses that entry and picks up again with the next one.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task;
use tracing::{debug, error, warn};

use super::cache::{Cache, CacheEntry};
use super::error::{ConsumerError, RegistrationError};

/// Updates a consumer may have queued before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// A component that wants the latest cluster info pushed to it.
///
/// `update` runs on the blocking pool, one call at a time per consumer,
/// in sequence order. It may take as long as it needs; while it runs,
/// further updates wait in the consumer's queue.
pub trait Consumer: Send + Sync {
    /// Registration identity. Two consumers with the same name cannot
    /// both be registered.
    fn name(&self) -> &str;

    fn update(&self, entry: Arc<CacheEntry>) -> Result<(), ConsumerError>;
}

// ── Channel consumer ────────────────────────────────────────────────

/// Forwards every update into an unbounded channel.
pub struct ChannelConsumer {
    name: String,
    tx: mpsc::UnboundedSender<Arc<CacheEntry>>,
}

impl ChannelConsumer {
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Arc<CacheEntry>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { name: name.into(), tx }, rx)
    }
}

impl Consumer for ChannelConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&self, entry: Arc<CacheEntry>) -> Result<(), ConsumerError> {
        self.tx.send(entry).map_err(|_| ConsumerError::Closed)
    }
}

// ── Registry ────────────────────────────────────────────────────────

struct Slot {
    name: String,
    queue: mpsc::Sender<Arc<CacheEntry>>,
    /// Highest entry sequence queued for this slot.
    delivered: u64,
}

impl Slot {
    fn offer(&mut self, entry: &Arc<CacheEntry>) {
        if entry.sequence <= self.delivered {
            return;
        }

        match self.queue.try_send(Arc::clone(entry)) {
            Ok(()) => self.delivered = entry.sequence,
            Err(TrySendError::Full(_)) => {
                warn!(
                    consumer = %self.name,
                    sequence = entry.sequence,
                    "Consumer is falling behind, dropping cluster info update"
                );
            }
            Err(TrySendError::Closed(_)) => {
                warn!(
                    consumer = %self.name,
                    sequence = entry.sequence,
                    "Consumer worker has stopped, dropping cluster info update"
                );
            }
        }
    }
}

/// Drains one consumer's queue until the slot is dropped.
fn spawn_worker(
    runtime: &Handle,
    consumer: Arc<dyn Consumer>,
    mut queue: mpsc::Receiver<Arc<CacheEntry>>,
) {
    runtime.spawn(async move {
        while let Some(entry) = queue.recv().await {
            let sequence = entry.sequence;
            let version = entry.version;
            let target = Arc::clone(&consumer);

            match task::spawn_blocking(move || target.update(entry)).await {
                Ok(Ok(())) => {
                    debug!(
                        consumer = consumer.name(),
                        sequence,
                        version,
                        "Delivered cluster info"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        consumer = consumer.name(),
                        sequence,
                        "Consumer failed to process cluster info update: {}",
                        e
                    );
                }
                Err(e) if e.is_panic() => {
                    error!(
                        consumer = consumer.name(),
                        sequence,
                        "Consumer panicked while processing cluster info update"
                    );
                }
                // Runtime shutting down.
                Err(_) => break,
            }
        }
    });
}

pub struct ConsumerRegistry {
    slots: Mutex<Vec<Slot>>,
    queue_capacity: usize,
}

impl Default for ConsumerRegistry {
    fn default() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose per-consumer queues hold up to `capacity` updates.
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            queue_capacity: capacity.max(1),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        // Nothing under this lock calls consumer code, so a poisoned
        // guard still holds a consistent slot list.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a consumer and immediately queue whatever `cache` holds for it.
    ///
    /// Nothing is delivered while the cache has never been written. Must
    /// be called from within a tokio runtime, which hosts the consumer's
    /// delivery worker.
    pub fn register(
        &self,
        consumer: Arc<dyn Consumer>,
        cache: &Cache,
    ) -> Result<(), RegistrationError> {
        let name = consumer.name().to_string();
        let mut slots = self.slots();
        if slots.iter().any(|s| s.name == name) {
            return Err(RegistrationError::DuplicateConsumer(name));
        }
        let runtime = Handle::try_current().map_err(|_| RegistrationError::NoRuntime(name.clone()))?;

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        spawn_worker(&runtime, consumer, rx);
        slots.push(Slot {
            name,
            queue: tx,
            delivered: 0,
        });

        // Read the cache under the lock: an entry swapped in before this
        // point is caught up here, anything later arrives via broadcast.
        let current = cache.get();
        if let Some(slot) = slots.last_mut() {
            slot.offer(&current);
        }
        Ok(())
    }

    /// Queue `entry` for every registered consumer. Never waits on a
    /// consumer.
    pub fn broadcast(&self, entry: &Arc<CacheEntry>) {
        let mut slots = self.slots();
        for slot in slots.iter_mut() {
            slot.offer(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered consumer names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.slots().iter().map(|s| s.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusterinfo::error::FetchError;
    use crate::clusterinfo::types::sample;
    use std::time::{Duration, Instant};
    use tokio::time;

    /// Records every sequence it is offered.
    struct Recorder {
        name: String,
        seen: Mutex<Vec<u64>>,
    }

    impl Recorder {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<u64> {
            self.seen.lock().unwrap().clone()
        }

        /// Wait until the recorded sequences satisfy `done`.
        async fn wait_until(&self, done: impl Fn(&[u64]) -> bool) -> Vec<u64> {
            time::timeout(Duration::from_secs(5), async {
                loop {
                    let seen = self.seen();
                    if done(&seen) {
                        return seen;
                    }
                    time::sleep(Duration::from_millis(1)).await;
                }
            })
            .await
            .unwrap_or_else(|_| panic!("{} stalled at {:?}", self.name, self.seen()))
        }

        async fn wait_for(&self, count: usize) -> Vec<u64> {
            self.wait_until(|seen| seen.len() >= count).await
        }
    }

    impl Consumer for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn update(&self, entry: Arc<CacheEntry>) -> Result<(), ConsumerError> {
            self.seen.lock().unwrap().push(entry.sequence);
            Ok(())
        }
    }

    struct Failing;

    impl Consumer for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn update(&self, _entry: Arc<CacheEntry>) -> Result<(), ConsumerError> {
            Err(ConsumerError::Rejected("not today".into()))
        }
    }

    struct Panicking;

    impl Consumer for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn update(&self, _entry: Arc<CacheEntry>) -> Result<(), ConsumerError> {
            panic!("consumer bug");
        }
    }

    /// Holds its worker on every update.
    struct Stalling;

    impl Consumer for Stalling {
        fn name(&self) -> &str {
            "stalling"
        }

        fn update(&self, _entry: Arc<CacheEntry>) -> Result<(), ConsumerError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        }
    }

    fn tick(cache: &Cache, registry: &ConsumerRegistry) -> Arc<CacheEntry> {
        let entry = cache.replace(Ok(sample("c", "7.10.2")));
        registry.broadcast(&entry);
        entry
    }

    #[tokio::test]
    async fn test_register_before_any_fetch_gets_nothing() {
        let cache = Cache::new();
        let registry = ConsumerRegistry::new();
        let rec = Recorder::new("indices");

        registry.register(rec.clone(), &cache).unwrap();
        tick(&cache, &registry);
        assert_eq!(rec.wait_for(1).await, vec![1], "no catch-up of the empty entry");
    }

    #[tokio::test]
    async fn test_catch_up_on_late_registration() {
        let cache = Cache::new();
        let registry = ConsumerRegistry::new();
        for _ in 0..3 {
            tick(&cache, &registry);
        }

        let rec = Recorder::new("late");
        registry.register(rec.clone(), &cache).unwrap();
        assert_eq!(rec.wait_for(1).await, vec![3], "catch-up delivers the cached entry");

        tick(&cache, &registry);
        assert_eq!(rec.wait_for(2).await, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_no_duplicate_when_catch_up_races_broadcast() {
        let cache = Cache::new();
        let registry = ConsumerRegistry::new();

        // Cache written, broadcast not yet run: registration sees the new entry.
        let entry = cache.replace(Ok(sample("c", "8.0.0")));
        let rec = Recorder::new("racer");
        registry.register(rec.clone(), &cache).unwrap();
        registry.broadcast(&entry);
        tick(&cache, &registry);

        assert_eq!(rec.wait_for(2).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let cache = Cache::new();
        let registry = ConsumerRegistry::new();
        registry.register(Recorder::new("indices"), &cache).unwrap();

        let err = registry.register(Recorder::new("indices"), &cache).unwrap_err();
        assert_eq!(err, RegistrationError::DuplicateConsumer("indices".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_outside_runtime_is_rejected() {
        let registry = ConsumerRegistry::new();
        let err = registry.register(Recorder::new("orphan"), &Cache::new()).unwrap_err();
        assert_eq!(err, RegistrationError::NoRuntime("orphan".into()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_failing_consumers_are_isolated() {
        let cache = Cache::new();
        let registry = ConsumerRegistry::new();
        registry.register(Arc::new(Failing), &cache).unwrap();
        registry.register(Arc::new(Panicking), &cache).unwrap();
        let rec = Recorder::new("healthy");
        registry.register(rec.clone(), &cache).unwrap();

        tick(&cache, &registry);
        tick(&cache, &registry);

        assert_eq!(rec.wait_for(2).await, vec![1, 2]);
        assert_eq!(registry.names(), vec!["failing", "panicking", "healthy"]);
    }

    #[tokio::test]
    async fn test_panicking_consumer_keeps_receiving() {
        struct PanicOnce(Recorder);

        impl Consumer for PanicOnce {
            fn name(&self) -> &str {
                self.0.name()
            }

            fn update(&self, entry: Arc<CacheEntry>) -> Result<(), ConsumerError> {
                if entry.sequence == 1 {
                    panic!("first update");
                }
                self.0.update(entry)
            }
        }

        let cache = Cache::new();
        let registry = ConsumerRegistry::new();
        let consumer = Arc::new(PanicOnce(Recorder {
            name: "flaky".into(),
            seen: Mutex::new(Vec::new()),
        }));
        registry.register(consumer.clone(), &cache).unwrap();

        tick(&cache, &registry);
        tick(&cache, &registry);
        assert_eq!(consumer.0.wait_for(1).await, vec![2]);
    }

    #[tokio::test]
    async fn test_slow_consumer_does_not_block_broadcast() {
        let cache = Cache::new();
        let registry = ConsumerRegistry::new();
        registry.register(Arc::new(Stalling), &cache).unwrap();
        let rec = Recorder::new("fast");
        registry.register(rec.clone(), &cache).unwrap();

        let started = Instant::now();
        for _ in 0..10 {
            tick(&cache, &registry);
        }
        assert!(started.elapsed() < Duration::from_millis(100), "broadcast waited on a consumer");
        assert_eq!(rec.wait_for(10).await, (1..=10).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_full_queue_drops_then_resumes() {
        let cache = Cache::new();
        let registry = ConsumerRegistry::with_queue_capacity(2);
        let rec = Recorder::new("behind");
        registry.register(rec.clone(), &cache).unwrap();

        // No yield in between: the worker cannot drain, so 3..=5 overflow.
        for _ in 0..5 {
            tick(&cache, &registry);
        }
        assert_eq!(rec.wait_for(2).await, vec![1, 2]);

        tick(&cache, &registry);
        assert_eq!(rec.wait_for(3).await, vec![1, 2, 6]);
    }

    #[tokio::test]
    async fn test_failed_fetches_are_broadcast() {
        let cache = Cache::new();
        let registry = ConsumerRegistry::new();
        let (consumer, mut rx) = ChannelConsumer::new("chan");
        registry.register(Arc::new(consumer), &cache).unwrap();

        tick(&cache, &registry);
        let entry = cache.replace(Err(FetchError::Status {
            endpoint: "http://localhost:9200/".into(),
            status: 500,
        }));
        registry.broadcast(&entry);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 1);
        assert!(second.last_error.is_some());
        assert!(second.document.is_some(), "stale document still delivered");
    }

    #[tokio::test]
    async fn test_closed_channel_consumer_does_not_break_broadcast() {
        let cache = Cache::new();
        let registry = ConsumerRegistry::new();
        let (consumer, rx) = ChannelConsumer::new("gone");
        drop(rx);
        registry.register(Arc::new(consumer), &cache).unwrap();
        let rec = Recorder::new("after");
        registry.register(rec.clone(), &cache).unwrap();

        tick(&cache, &registry);
        tick(&cache, &registry);
        assert_eq!(rec.wait_for(2).await, vec![1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_and_broadcast() {
        const TICKS: u64 = 200;
        const CONSUMERS: usize = 32;

        let cache = Arc::new(Cache::new());
        // Room for every entry, so nothing is dropped for capacity.
        let registry = Arc::new(ConsumerRegistry::with_queue_capacity(TICKS as usize + 1));

        let broadcaster = {
            let (cache, registry) = (Arc::clone(&cache), Arc::clone(&registry));
            task::spawn_blocking(move || {
                for _ in 0..TICKS {
                    tick(&cache, &registry);
                }
            })
        };
        let registrar = {
            let (cache, registry) = (Arc::clone(&cache), Arc::clone(&registry));
            task::spawn_blocking(move || {
                (0..CONSUMERS)
                    .map(|i| {
                        let rec = Recorder::new(&format!("consumer-{i}"));
                        registry.register(rec.clone(), &cache).unwrap();
                        std::thread::yield_now();
                        rec
                    })
                    .collect::<Vec<_>>()
            })
        };

        broadcaster.await.unwrap();
        let recorders = registrar.await.unwrap();
        assert_eq!(registry.len(), CONSUMERS);

        for rec in recorders {
            let seen = rec.wait_until(|seen| seen.last() == Some(&TICKS)).await;
            assert!(
                seen.windows(2).all(|w| w[1] == w[0] + 1),
                "{} saw a gap or duplicate: {seen:?}",
                rec.name
            );
        }
    }
}
