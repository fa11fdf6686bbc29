//! Kernel object cache multiplexer
//!
//! Owns the kernel notification channel and a single poll thread. Each cache
//! kind gets one [`KernelCache`] shared by any number of subscribers; a late
//! subscriber is replayed the current cache contents as Created events before
//! it sees any delta.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Continuous kernel state monitoring
//! - AU-12: Audit Record Generation - Every kernel change is dispatched

mod cache;

pub use cache::KernelCache;

use crate::error::{KermondError, Result};
use crate::kernel::KernelChannel;
use crate::metrics::Metrics;
use crate::types::{CacheKind, ChangeEvent, Notification};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Default bounded wait of the poll thread
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Subscriber callback. Runs on the poll thread (or, for the replay, on the
/// subscribing thread) and must not subscribe or unsubscribe.
pub type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct CacheDescriptor {
    generation: u64,
    cache: KernelCache,
    subscribers: Vec<(SubscriberId, Callback)>,
}

struct Shared {
    channel: Arc<dyn KernelChannel>,
    registry: Mutex<HashMap<CacheKind, Arc<Mutex<CacheDescriptor>>>>,
    running: AtomicBool,
    shutdown: CancellationToken,
    metrics: Arc<Metrics>,
}

impl Shared {
    fn descriptor(&self, kind: CacheKind) -> Option<Arc<Mutex<CacheDescriptor>>> {
        self.registry.lock().get(&kind).cloned()
    }

    /// Apply one notification and fan the resulting change out
    fn dispatch(&self, notification: Notification) {
        let kind = notification.object.kind();
        let Some(descriptor) = self.descriptor(kind) else {
            trace!(%kind, "No cache for notification, dropping");
            return;
        };

        let mut desc = descriptor.lock();
        let Some(event) = desc.cache.apply(notification) else {
            return;
        };

        trace!(
            %kind,
            action = ?event.action,
            subscribers = desc.subscribers.len(),
            "Dispatching"
        );
        self.fan_out(&desc, &event);
    }

    fn fan_out(&self, desc: &CacheDescriptor, event: &ChangeEvent) {
        for (_, callback) in &desc.subscribers {
            callback(event);
        }
        self.metrics
            .dispatched_events_total
            .with_label_values(&[event.kind.as_str()])
            .inc_by(desc.subscribers.len() as u64);
    }

    /// Re-dump every live cache after an overrun and dispatch the difference
    #[instrument(skip(self))]
    fn resync(&self) -> Result<()> {
        let live: Vec<(CacheKind, Arc<Mutex<CacheDescriptor>>)> = self
            .registry
            .lock()
            .iter()
            .map(|(kind, d)| (*kind, Arc::clone(d)))
            .collect();

        for (kind, descriptor) in live {
            let objects = self.channel.dump(kind)?;
            let mut desc = descriptor.lock();
            let events = desc.cache.resync(objects);
            info!(%kind, changes = events.len(), "Cache resynchronised");
            for event in &events {
                self.fan_out(&desc, event);
            }
        }
        Ok(())
    }

    fn poll_loop(&self, interval: Duration) {
        debug!("Starting netlink monitor");
        while self.running.load(Ordering::Acquire) {
            match self.channel.poll(interval) {
                Ok(batch) => {
                    for notification in batch {
                        self.dispatch(notification);
                    }
                }
                Err(KermondError::Interrupted) => continue,
                Err(KermondError::Overrun) => {
                    warn!("Kernel notifications lost, re-dumping caches");
                    if let Err(e) = self.resync() {
                        error!(error = %e, "Failed to resynchronise caches");
                        self.shutdown.cancel();
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to poll kernel notifications");
                    self.shutdown.cancel();
                    break;
                }
            }
        }
        debug!("Netlink monitor exiting");
    }
}

/// Multiplexes kernel object caches to subscribers
pub struct CacheMux {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    poll_interval: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CacheMux {
    /// `shutdown` is cancelled on fatal kernel failures
    pub fn new(
        channel: Arc<dyn KernelChannel>,
        shutdown: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                channel,
                registry: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                shutdown,
                metrics,
            }),
            next_id: AtomicU64::new(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
            worker: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Spawn the poll thread
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let interval = self.poll_interval;
        let handle = std::thread::Builder::new()
            .name("netlink".into())
            .spawn(move || shared.poll_loop(interval))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                error!(error = %e, "Failed to spawn netlink monitor");
                self.shared.shutdown.cancel();
                KermondError::Io(e)
            })?;

        *worker = Some(handle);
        info!(interval_ms = interval.as_millis() as u64, "Cache multiplexer started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Stop the poll thread after its current wait completes
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        debug!("Stopping cache multiplexer");
        self.shared.running.store(false, Ordering::Release);
        if handle.join().is_err() {
            error!("Netlink monitor thread panicked");
        }
    }

    /// Subscribe to changes for `kind`, replaying current state first
    #[instrument(skip(self, callback))]
    pub fn subscribe(&self, kind: CacheKind, callback: Callback) -> Result<SubscriberId> {
        if !self.is_started() {
            error!(%kind, "Netlink not initialised");
            return Err(KermondError::NotStarted);
        }

        let descriptor = {
            let mut registry = self.shared.registry.lock();
            match registry.get(&kind) {
                Some(existing) => Arc::clone(existing),
                None => {
                    let objects = self.shared.channel.dump(kind).map_err(|e| {
                        error!(%kind, error = %e, "Allocate cache failed");
                        self.shared.shutdown.cancel();
                        KermondError::CacheAllocation {
                            kind,
                            reason: e.to_string(),
                        }
                    })?;
                    let generation = self.next_id.fetch_add(1, Ordering::Relaxed);
                    debug!(%kind, generation, objects = objects.len(), "Allocated cache");
                    let created = Arc::new(Mutex::new(CacheDescriptor {
                        generation,
                        cache: KernelCache::from_objects(objects),
                        subscribers: Vec::new(),
                    }));
                    registry.insert(kind, Arc::clone(&created));
                    created
                }
            }
        };

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut desc = descriptor.lock();
        desc.subscribers.push((id, Arc::clone(&callback)));

        // Replay under the descriptor lock so no delta can overtake it
        for object in desc.cache.objects() {
            callback(&ChangeEvent::created(object.clone()));
        }
        debug!(
            %kind,
            replayed = desc.cache.len(),
            subscribers = desc.subscribers.len(),
            "Subscribed"
        );
        Ok(id)
    }

    /// Remove a subscriber, freeing the cache when it was the last one
    #[instrument(skip(self))]
    pub fn unsubscribe(&self, kind: CacheKind, id: SubscriberId) {
        let mut registry = self.shared.registry.lock();
        let Some(descriptor) = registry.get(&kind).cloned() else {
            return;
        };

        let mut desc = descriptor.lock();
        desc.subscribers.retain(|(sub, _)| *sub != id);
        if desc.subscribers.is_empty() {
            debug!(%kind, generation = desc.generation, "Releasing cache");
            registry.remove(&kind);
        }
    }

    /// Allocation generation of the live cache for `kind`
    pub fn cache_generation(&self, kind: CacheKind) -> Option<u64> {
        self.shared.descriptor(kind).map(|d| d.lock().generation)
    }

    pub fn subscriber_count(&self, kind: CacheKind) -> usize {
        self.shared
            .descriptor(kind)
            .map_or(0, |d| d.lock().subscribers.len())
    }

    /// Number of objects currently cached for `kind`
    pub fn cached_len(&self, kind: CacheKind) -> usize {
        self.shared.descriptor(kind).map_or(0, |d| d.lock().cache.len())
    }

    /// Feed a notification through the dispatch path on the calling thread
    pub fn inject(&self, notification: Notification) {
        self.shared.dispatch(notification);
    }
}

impl Drop for CacheMux {
    fn drop(&mut self) {
        self.stop();
    }
}
