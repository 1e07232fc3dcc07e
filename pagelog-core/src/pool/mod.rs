//! In-memory buffer pool
//!
//! Holds one active page per stream plus a bounded FIFO of recently sealed
//! pages. A flusher thread seals active pages that have gone stale and hands
//! queued sealed pages to a [`PageFlusher`]; a reaper thread evicts sealed pages once they have been
//! persisted for long enough, or when a stream holds too many.

mod active;

pub use active::{ActivePage, NewPage};

use crate::{now_millis, LogsError, Lsn, Result, StreamKey, TimeRange, Timestamp};
use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

const AWAIT_POLL: Duration = Duration::from_millis(50);

/// A page type the pool can buffer
pub trait AppendOnlyPage: Clone + Send + Sync + 'static {
    type Record: Send;

    fn append(&mut self, record: Self::Record);

    /// Whether the page should be sealed
    fn is_full(&self) -> bool;

    fn is_empty(&self) -> bool;

    /// `[first, last]` record time, `None` while empty
    fn range(&self) -> Option<TimeRange>;

    /// Highest WAL sequence appended to this page
    fn max_lsn(&self) -> Lsn;

    fn update_lsn(&mut self, lsn: Lsn);

    /// Estimated encoded size in bytes
    fn approx_bytes(&self) -> usize;
}

/// Persists sealed pages
pub trait PageFlusher<P>: Send + Sync {
    fn flush(&self, key: &StreamKey, page: &P) -> Result<()>;
}

impl<P, F> PageFlusher<P> for F
where
    F: Fn(&StreamKey, &P) -> Result<()> + Send + Sync,
{
    fn flush(&self, key: &StreamKey, page: &P) -> Result<()> {
        self(key, page)
    }
}

/// Builds the empty page for a stream
pub type PageFactory<P> = Arc<dyn Fn(&StreamKey) -> P + Send + Sync>;

/// Buffer pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Sealed pages kept per stream regardless of persistence
    pub sealed_cap: usize,
    /// Persisted sealed pages are evicted after this many milliseconds
    pub sealed_ttl_ms: i64,
    /// Active pages whose first record is older than this are sealed by the
    /// flusher even if they are not full
    pub stale_page_ms: i64,
    /// Flusher period
    pub flush_interval_ms: u64,
    /// Reaper period
    pub reap_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            sealed_cap: crate::config::SEALED_CAP,
            sealed_ttl_ms: crate::config::SEALED_TTL_MS,
            stale_page_ms: crate::config::PAGE_MAX_RANGE_MS,
            flush_interval_ms: crate::config::FLUSHER_MILLIS,
            reap_interval_ms: crate::config::REAPER_MILLIS,
        }
    }
}

impl PoolConfig {
    /// Reject values the schedulers cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sealed_cap == 0 {
            return Err(LogsError::Config("sealed_cap must be positive".into()));
        }
        if self.sealed_ttl_ms <= 0 {
            return Err(LogsError::Config("sealed_ttl_ms must be positive".into()));
        }
        if self.stale_page_ms <= 0 {
            return Err(LogsError::Config("stale_page_ms must be positive".into()));
        }
        if self.flush_interval_ms == 0 || self.reap_interval_ms == 0 {
            return Err(LogsError::Config("scheduler intervals must be positive".into()));
        }
        Ok(())
    }
}

/// A sealed page and when it was confirmed persisted (0 = not yet)
#[derive(Debug, Clone)]
pub struct SealedEntry<P> {
    pub page: Arc<P>,
    pub sealed_at: Timestamp,
    pub persisted_at: Timestamp,
}

/// A sealed page waiting for the flusher
#[derive(Debug, Clone)]
pub struct PendingFlush<P> {
    pub key: StreamKey,
    pub page: Arc<P>,
}

struct StreamSlot<P: AppendOnlyPage> {
    active: ActivePage<P>,
    sealed: Mutex<VecDeque<SealedEntry<P>>>,
}

struct PoolInner<P: AppendOnlyPage> {
    config: PoolConfig,
    streams: RwLock<HashMap<StreamKey, Arc<StreamSlot<P>>>>,
    factory: PageFactory<P>,
    flusher: Arc<dyn PageFlusher<P>>,
    queue_tx: Sender<PendingFlush<P>>,
    queue_rx: Receiver<PendingFlush<P>>,
    /// Queued plus currently flushing
    pending: AtomicUsize,
}

/// Per-stream page buffer with background flush and eviction
pub struct BufferPool<P: AppendOnlyPage> {
    inner: Arc<PoolInner<P>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: AppendOnlyPage> BufferPool<P> {
    /// Create a pool and start its flusher and reaper threads
    pub fn new(
        config: PoolConfig,
        factory: PageFactory<P>,
        flusher: Arc<dyn PageFlusher<P>>,
    ) -> Result<Self> {
        config.validate()?;

        let (queue_tx, queue_rx) = unbounded();
        let inner = Arc::new(PoolInner {
            config,
            streams: RwLock::new(HashMap::new()),
            factory,
            flusher,
            queue_tx,
            queue_rx,
            pending: AtomicUsize::new(0),
        });

        let (shutdown_tx, shutdown_rx) = unbounded::<()>();
        let flush_every = Duration::from_millis(inner.config.flush_interval_ms);
        let reap_every = Duration::from_millis(inner.config.reap_interval_ms);

        let flush_worker = spawn_periodic("pagelog-flusher", flush_every, shutdown_rx.clone(), {
            let inner = inner.clone();
            move || {
                inner.seal_stale(now_millis());
                inner.flush_queued();
            }
        })?;
        let reap_worker = spawn_periodic("pagelog-reaper", reap_every, shutdown_rx, {
            let inner = inner.clone();
            move || {
                inner.reap();
            }
        })?;

        info!(
            "Buffer pool started: flush every {:?}, reap every {:?}, sealed cap {}",
            flush_every, reap_every, inner.config.sealed_cap
        );

        Ok(Self {
            inner,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            workers: Mutex::new(vec![flush_worker, reap_worker]),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Append a record to a stream's active page, sealing it if full
    pub fn append(&self, lsn: Lsn, key: &StreamKey, record: P::Record) {
        let slot = self.inner.slot(key);
        slot.active.append(lsn, record, |page| self.inner.seal(key, &slot, page));
    }

    /// Current active page of a stream
    pub fn snapshot_active(&self, key: &StreamKey) -> Option<Arc<P>> {
        let streams = self.inner.streams.read();
        streams.get(key).map(|slot| slot.active.snapshot())
    }

    /// Sealed pages of a stream overlapping `range`, oldest first
    pub fn snapshot_sealed(&self, key: &StreamKey, range: TimeRange) -> Vec<Arc<P>> {
        let slot = match self.inner.streams.read().get(key) {
            Some(slot) => slot.clone(),
            None => return Vec::new(),
        };
        let sealed = slot.sealed.lock();
        sealed
            .iter()
            .filter(|entry| entry.page.range().map_or(false, |r| r.overlaps(&range)))
            .map(|entry| entry.page.clone())
            .collect()
    }

    /// Copy of a stream's sealed deque, oldest first
    pub fn sealed_entries(&self, key: &StreamKey) -> Vec<SealedEntry<P>> {
        let streams = self.inner.streams.read();
        streams
            .get(key)
            .map(|slot| slot.sealed.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All streams that have received data
    pub fn streams(&self) -> Vec<StreamKey> {
        self.inner.streams.read().keys().cloned().collect()
    }

    /// Seal every non-empty active page that started before `boundary`
    pub fn flush_pages_older_than(&self, boundary: Timestamp) -> usize {
        self.inner.rotate_all(|active, on_seal| {
            active.rotate_if_older_than_and_not_empty(boundary, on_seal)
        })
    }

    /// Seal every non-empty active page
    pub fn flush_all_now(&self) -> usize {
        self.inner
            .rotate_all(|active, on_seal| active.rotate_if_non_empty(on_seal))
    }

    /// Number of sealed pages queued or being flushed
    pub fn pending_flushes(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Poll until the flush queue drains; `false` on timeout
    pub fn await_flush_queue_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending_flushes() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(AWAIT_POLL.min(deadline - now));
        }
    }

    /// Flush everything queued right now on the calling thread
    pub fn flush_queued(&self) -> usize {
        self.inner.flush_queued()
    }

    /// Run one eviction pass; returns the number of pages evicted
    pub fn reap(&self) -> usize {
        self.inner.reap()
    }

    /// Stop the flusher and reaper. Queued flushes are not drained.
    pub fn shutdown(&self) {
        let Some(tx) = self.shutdown_tx.lock().take() else {
            return;
        };
        drop(tx);

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                error!("Buffer pool worker panicked");
            }
        }

        info!(
            "Buffer pool stopped with {} page(s) awaiting flush",
            self.pending_flushes()
        );
    }
}

impl<P: AppendOnlyPage> Drop for BufferPool<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<P: AppendOnlyPage> PoolInner<P> {
    fn slot(&self, key: &StreamKey) -> Arc<StreamSlot<P>> {
        if let Some(slot) = self.streams.read().get(key) {
            return slot.clone();
        }

        let mut streams = self.streams.write();
        streams
            .entry(key.clone())
            .or_insert_with(|| {
                let factory = self.factory.clone();
                let stream = key.clone();
                debug!("Created active page for {}", stream);
                Arc::new(StreamSlot {
                    active: ActivePage::new(Box::new(move || factory(&stream))),
                    sealed: Mutex::new(VecDeque::new()),
                })
            })
            .clone()
    }

    fn seal(&self, key: &StreamKey, slot: &StreamSlot<P>, page: Arc<P>) {
        slot.sealed.lock().push_back(SealedEntry {
            page: page.clone(),
            sealed_at: now_millis(),
            persisted_at: 0,
        });

        self.pending.fetch_add(1, Ordering::AcqRel);
        let pending = PendingFlush {
            key: key.clone(),
            page,
        };
        if self.queue_tx.send(pending).is_err() {
            // receiver lives in self, so this only happens mid-teardown
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Seal active pages that started more than `stale_page_ms` before `now`
    fn seal_stale(&self, now: Timestamp) -> usize {
        let boundary = now.saturating_sub(self.config.stale_page_ms);
        let sealed = self.rotate_all(|active, on_seal| {
            active.rotate_if_older_than_and_not_empty(boundary, on_seal)
        });
        if sealed > 0 {
            debug!("Sealed {} stale page(s) started before {}", sealed, boundary);
        }
        sealed
    }

    fn rotate_all(
        &self,
        rotate: impl Fn(&ActivePage<P>, &mut dyn FnMut(Arc<P>)) -> bool,
    ) -> usize {
        let slots: Vec<_> = self
            .streams
            .read()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();

        let mut sealed = 0;
        for (key, slot) in slots {
            if rotate(&slot.active, &mut |page| self.seal(&key, &slot, page)) {
                sealed += 1;
            }
        }
        sealed
    }

    fn flush_queued(&self) -> usize {
        let batch: Vec<_> = self.queue_rx.try_iter().collect();
        let mut flushed = 0;

        for item in batch {
            match self.flusher.flush(&item.key, &item.page) {
                Ok(()) => {
                    self.mark_persisted(&item.key, &item.page);
                    flushed += 1;
                    debug!(
                        "Flushed page for {} ({} bytes, lsn {})",
                        item.key,
                        item.page.approx_bytes(),
                        item.page.max_lsn()
                    );
                }
                Err(e) => {
                    error!("Dropping page for {} after failed flush: {}", item.key, e);
                }
            }
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        flushed
    }

    fn mark_persisted(&self, key: &StreamKey, page: &Arc<P>) {
        let Some(slot) = self.streams.read().get(key).cloned() else {
            return;
        };
        let mut sealed = slot.sealed.lock();
        if let Some(entry) = sealed.iter_mut().find(|e| Arc::ptr_eq(&e.page, page)) {
            entry.persisted_at = now_millis();
        }
    }

    fn reap(&self) -> usize {
        let now = now_millis();
        let ttl = self.config.sealed_ttl_ms;
        let cap = self.config.sealed_cap;
        let slots: Vec<_> = self.streams.read().values().cloned().collect();

        let mut evicted = 0;
        for slot in slots {
            let mut sealed = slot.sealed.lock();
            while let Some(head) = sealed.front() {
                if head.persisted_at > 0 && now - head.persisted_at >= ttl {
                    sealed.pop_front();
                    evicted += 1;
                } else {
                    break;
                }
            }
            while sealed.len() > cap {
                sealed.pop_front();
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!("Reaper evicted {} sealed page(s)", evicted);
        }
        evicted
    }
}

fn spawn_periodic(
    name: &str,
    every: Duration,
    shutdown: Receiver<()>,
    task: impl Fn() + Send + 'static,
) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let ticker = tick(every);
            loop {
                select! {
                    recv(ticker) -> _ => task(),
                    recv(shutdown) -> _ => break,
                }
            }
        })?;
    Ok(handle)
}
