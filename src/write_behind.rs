//! Write-behind coordinator.
//!
//! An update or delete is applied to the cache right away, while the backing store write is deferred to the
//! [`OrderedExecutor`] under the record's mark key. Deferred updates coalesce: the pending table keeps only the latest
//! state per record, and the queued task writes whatever is pending when it runs. Several rapid updates may thus end
//! up as a single store write of the last state. Callers that need every intermediate state persisted must use the
//! synchronous [`CachedDao`] methods instead.
//!
//! Updates and deletes of the same record share the mark key, hence the executor lane, so a delete submitted after an
//! update never lets the update's store write land after it.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::prelude::*;

/// Latest not yet persisted state per record.
#[derive(Debug)]
pub struct PendingWrites<R> {
    entries: Mutex<HashMap<PendingKey, R>>,
}

impl<R> Default for PendingWrites<R> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<R> PendingWrites<R> {
    /// Returns `true` if an older pending state was replaced.
    pub(crate) fn put(&self, key: PendingKey, record: R) -> bool {
        self.entries.lock().insert(key, record).is_some()
    }

    pub(crate) fn take(&self, key: &PendingKey) -> Option<R> {
        self.entries.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[derive(Debug, Default)]
struct Counters {
    accepted:  AtomicU64,
    coalesced: AtomicU64,
    written:   AtomicU64,
    failed:    AtomicU64,
}

impl Counters {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of the coordinator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteBehindStats {
    /// Deferred writes queued for the store.
    pub accepted:  u64,
    /// Pending updates superseded before they reached the store, by a newer update or by a delete.
    pub coalesced: u64,
    /// Deferred writes the store applied.
    pub written:   u64,
    /// Deferred writes the store rejected. These are lost.
    pub failed:    u64,
}

#[derive(Debug, Clone)]
pub struct WriteBehind {
    executor: OrderedExecutor,
    counters: Arc<Counters>,
}

impl WriteBehind {
    pub fn new(executor: OrderedExecutor) -> Self {
        Self {
            executor,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn executor(&self) -> &OrderedExecutor {
        &self.executor
    }

    pub fn stats(&self) -> WriteBehindStats {
        WriteBehindStats {
            accepted:  self.counters.accepted.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            written:   self.counters.written.load(Ordering::Relaxed),
            failed:    self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Update `record` in the cache now and in the store eventually.
    ///
    /// Returns the outcome of the cache step. If the cache step fails or the executor is shut down, the store is updated
    /// synchronously and its outcome is returned instead.
    pub async fn update<R: Record>(&self, dao: &CachedDao<R>, record: R) -> Result<bool> {
        let mark_key = dao.mark_key(&record);
        let pending_key = dao.pending_key(&record);

        let updated = match dao.cache_update(&record).await {
            Ok(updated) => updated,
            Err(err) => {
                error!("[{mark_key}] cache update failed, writing to store directly: {err}");
                // An older pending state must not land after this write.
                if dao.pending().take(&pending_key).is_some() {
                    Counters::bump(&self.counters.coalesced);
                }
                return dao.store_update(&record).await;
            }
        };

        if self.executor.is_shutdown() {
            warn!("[{mark_key}] executor is shut down, writing to store directly");
            return dao.store_update(&record).await;
        }

        if dao.pending().put(pending_key.clone(), record) {
            debug!("[{mark_key}] coalesced with a pending update");
            Counters::bump(&self.counters.coalesced);
        }

        let task_dao = dao.clone();
        let counters = Arc::clone(&self.counters);
        let task_key = mark_key.clone();
        let task_pending_key = pending_key.clone();
        let submitted = self.executor.submit(ordering_key(&mark_key), async move {
            // Nothing to do if a later task or a delete took the pending state already.
            if let Some(record) = task_dao.pending().take(&task_pending_key) {
                match task_dao.store_update(&record).await {
                    Ok(_) => Counters::bump(&counters.written),
                    Err(err) => {
                        Counters::bump(&counters.failed);
                        error!("[{task_key}] deferred update lost: {err}");
                    }
                }
            }
            Ok(())
        });

        match submitted {
            Ok(()) => {
                Counters::bump(&self.counters.accepted);
                Ok(updated)
            }
            Err(Error::ExecutorShutdown) => {
                // Lost the race with shutdown.
                match dao.pending().take(&pending_key) {
                    Some(record) => dao.store_update(&record).await,
                    None => Ok(updated),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Remove `record` from the cache now and from the store eventually. A pending update of the record is dropped.
    ///
    /// Returns the number of cache entries removed, i.e. 1 or 0. If the cache step fails, the record is deleted
    /// synchronously and the number of store rows removed is returned instead.
    pub async fn delete<R: Record>(&self, dao: &CachedDao<R>, record: R) -> Result<u64> {
        let mark_key = dao.mark_key(&record);

        let superseded = dao.pending().take(&dao.pending_key(&record)).is_some();
        if superseded {
            debug!("[{mark_key}] delete supersedes a pending update");
            Counters::bump(&self.counters.coalesced);
        }

        let removed = match dao.cache_delete(&record).await {
            Ok(removed) => removed,
            Err(err) => {
                error!("[{mark_key}] cache delete failed, deleting directly: {err}");
                return dao.delete(&record).await;
            }
        };

        let task_dao = dao.clone();
        let counters = Arc::clone(&self.counters);
        let task_key = mark_key.clone();
        let task_record = record.clone();
        let submitted = self.executor.submit(ordering_key(&mark_key), async move {
            match task_dao.store_delete(&task_record).await {
                Ok(_) => Counters::bump(&counters.written),
                Err(err) => {
                    Counters::bump(&counters.failed);
                    error!("[{task_key}] deferred delete lost: {err}");
                }
            }
            Ok(())
        });

        match submitted {
            Ok(()) => {
                Counters::bump(&self.counters.accepted);
                Ok(removed)
            }
            Err(Error::ExecutorShutdown) => {
                warn!("[{mark_key}] executor is shut down, deleting from store directly");
                dao.store_delete(&record).await?;
                Ok(removed)
            }
            Err(err) => Err(err),
        }
    }

    /// Resolves when every deferred write submitted so far has been applied.
    pub async fn wait_idle(&self) {
        self.executor.wait_idle().await
    }

    /// Stop accepting deferred writes and drain the queued ones. Later calls to [`update()`](Self::update) and
    /// [`delete()`](Self::delete) write to the store synchronously.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
        let stats = self.stats();
        debug!(
            "write-behind stopped: {} accepted, {} coalesced, {} written, {} failed",
            stats.accepted, stats.coalesced, stats.written, stats.failed
        );
    }
}
