//! Ordered key executor.
//!
//! Tasks are distributed over a fixed array of lanes by their ordering key. A lane is a FIFO queue plus an "active"
//! flag; it is scheduled onto the tokio runtime only when the flag goes from `false` to `true`, so at most one drain of
//! a lane runs at any time. Tasks sharing a key therefore run one after another in submission order, while lanes
//! drain in parallel up to the configured number of workers.
//!
//! Each activation runs at most `batch_limit` tasks and then yields the worker, so a hot key cannot starve unrelated
//! keys colliding on the same lane.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use fieldx::fxstruct;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::Error;
use crate::error::Result;

pub type Task = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

pub const DEFAULT_LANES: usize = 1024;
pub const DEFAULT_BATCH_LIMIT: usize = 5;

// A lane queue longer than this is reported as slow.
const LANE_QUEUE_WARN: usize = 10;

#[fxstruct(no_new, builder, get(copy))]
#[derive(Debug, Clone)]
pub struct ExecutorParams {
    /// Used in log records only.
    #[fieldx(get(clone), default(String::from("ordered")))]
    name:        String,
    #[fieldx(default(DEFAULT_LANES))]
    lanes:       usize,
    /// Tasks drained per lane activation. Zero means unlimited.
    #[fieldx(default(DEFAULT_BATCH_LIMIT))]
    batch_limit: usize,
    /// Maximum number of lanes draining at the same time.
    #[fieldx(default(num_cpus::get()))]
    workers:     usize,
}

struct Lane {
    id:     usize,
    tasks:  SegQueue<Task>,
    active: AtomicBool,
}

struct Shared {
    name:        String,
    lanes:       Vec<Lane>,
    batch_limit: usize,
    workers:     Semaphore,
    shutdown:    AtomicBool,
    // Scheduled or running lane drains plus submissions in progress.
    in_flight:   AtomicUsize,
    idle:        Notify,
    runtime:     Handle,
}

impl Shared {
    fn reserve(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn schedule(self: &Arc<Self>, lane_id: usize) {
        self.reserve();
        let shared = Arc::clone(self);
        self.runtime.spawn(shared.drain(lane_id));
    }

    async fn drain(self: Arc<Self>, lane_id: usize) {
        {
            let _permit = self.workers.acquire().await.ok();
            let lane = &self.lanes[lane_id];
            let mut ran = 0;

            while let Some(task) = lane.tasks.pop() {
                // Spawned separately so that a panicking task is reported as a join error instead of taking the
                // lane down with it.
                match self.runtime.spawn(task).await {
                    Ok(Ok(())) => (),
                    Ok(Err(err)) => error!("[{}] task in lane #{} failed: {err}", self.name, lane.id),
                    Err(err) => error!("[{}] task in lane #{} panicked: {err}", self.name, lane.id),
                }

                ran += 1;
                // After shutdown lanes are drained completely.
                if self.batch_limit > 0 && ran >= self.batch_limit && !self.shutdown.load(Ordering::Acquire) {
                    break;
                }
            }

            lane.active.store(false, Ordering::Release);

            // A task pushed between the last pop and the flag reset would be stranded otherwise.
            if !lane.tasks.is_empty()
                && lane
                    .active
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                self.schedule(lane_id);
            }
        }

        self.release();
    }
}

// Holds an in-flight slot for the duration of a submit, so that a concurrent shutdown waits for the task being pushed.
struct SubmitGuard<'a>(&'a Shared);

impl<'a> SubmitGuard<'a> {
    fn new(shared: &'a Shared) -> Self {
        shared.reserve();
        Self(shared)
    }
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Bounded-parallelism executor serializing tasks per ordering key.
#[derive(Clone)]
pub struct OrderedExecutor {
    shared: Arc<Shared>,
}

impl OrderedExecutor {
    /// Must be called within a tokio runtime; lanes are drained on it.
    pub fn new(params: ExecutorParams) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|err| Error::Config(format!("ordered executor: {err}")))?;

        if params.lanes() == 0 {
            return Err(Error::InvalidArgument("ordered executor needs at least one lane".into()));
        }

        let workers = params.workers().max(1);
        info!(
            "[{}] init ordered executor: {} lanes, {} workers, batch limit {}",
            params.name(),
            params.lanes(),
            workers,
            params.batch_limit()
        );

        let lanes = (0..params.lanes())
            .map(|id| Lane {
                id,
                tasks: SegQueue::new(),
                active: AtomicBool::new(false),
            })
            .collect();

        Ok(Self {
            shared: Arc::new(Shared {
                name: params.name(),
                lanes,
                batch_limit: params.batch_limit(),
                workers: Semaphore::new(workers),
                shutdown: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                runtime,
            }),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(ExecutorParams::builder().build().map_err(|err| Error::Config(err.to_string()))?)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn lane_count(&self) -> usize {
        self.shared.lanes.len()
    }

    #[inline]
    pub fn lane_of(&self, key: i64) -> usize {
        (key.unsigned_abs() % self.shared.lanes.len() as u64) as usize
    }

    /// Enqueue `task` on the lane selected by `key`. Never runs the task inline and never waits.
    pub fn submit<F>(&self, key: i64, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        // The slot must be taken before the flag is checked: shutdown sets the flag first and then waits for slots.
        let _guard = SubmitGuard::new(&self.shared);
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(Error::ExecutorShutdown);
        }

        let lane_id = self.lane_of(key);
        let lane = &self.shared.lanes[lane_id];
        lane.tasks.push(Box::pin(task));

        let queued = lane.tasks.len();
        if queued > LANE_QUEUE_WARN {
            warn!("[{}] lane #{lane_id} queue is growing: {queued} tasks", self.shared.name);
        }

        if lane
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.shared.schedule(lane_id);
        }

        Ok(())
    }

    /// Number of tasks waiting in all lanes.
    pub fn queued(&self) -> usize {
        self.shared.lanes.iter().map(|lane| lane.tasks.len()).sum()
    }

    pub fn lane_queued(&self, lane_id: usize) -> usize {
        self.shared.lanes.get(lane_id).map_or(0, |lane| lane.tasks.len())
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Resolves once no lane is scheduled or draining and no submit is in progress.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
    }

    /// Stop accepting tasks and wait for every accepted one to complete.
    pub async fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::SeqCst) {
            debug!("[{}] shutting down with {} queued tasks", self.shared.name, self.queued());
        }
        self.wait_idle().await;
    }
}

impl std::fmt::Debug for OrderedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedExecutor")
            .field("name", &self.shared.name)
            .field("lanes", &self.shared.lanes.len())
            .field("batch_limit", &self.shared.batch_limit)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
