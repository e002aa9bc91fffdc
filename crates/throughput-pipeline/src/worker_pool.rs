//! # Worker Pool
//!
//! Fixed-size pool of async execution slots with a priority queue in front.
//!
//! ```text
//! submit() ──→ [BinaryHeap by (priority, FIFO)] ──dispatcher──→ permit ──→ tokio task
//!                                                   (max_workers semaphore permits)
//! ```
//!
//! A single dispatcher task pops the highest-priority job whenever one of
//! the `max_workers` permits is free. Each job runs in its own task and
//! resolves a [`JobHandle`] with its result.
//!
//! `shutdown()` stops new submissions, lets the dispatcher drain the queue,
//! then waits until every permit is back.

use crate::config::WorkerPoolConfig;
use crate::domain::{JobKind, PipelineError, PipelineResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct QueuedJob {
    priority: u8,
    sequence: u64,
    kind: JobKind,
    run: BoxedJob,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    // Max-heap: higher priority first, then lower sequence (older) first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Snapshot of pool statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolStats {
    pub max_workers: usize,
    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub active_workers: usize,
    pub queued_jobs: usize,
    /// Completed jobs per second since the pool started.
    pub throughput: f64,
}

struct PoolShared {
    queue: Mutex<BinaryHeap<QueuedJob>>,
    notify: Notify,
    accepting: AtomicBool,
    closed: AtomicBool,
    next_sequence: AtomicU64,
    total: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    active: AtomicUsize,
    started_at: Instant,
}

/// Handle to a submitted job's result.
#[must_use = "a job handle does nothing unless joined"]
pub struct JobHandle<T> {
    kind: JobKind,
    receiver: oneshot::Receiver<PipelineResult<T>>,
}

impl<T> JobHandle<T> {
    #[must_use]
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Wait for the job to finish.
    ///
    /// Returns `JobCancelled` if the job panicked or was dropped.
    pub async fn join(self) -> PipelineResult<T> {
        self.receiver
            .await
            .map_err(|_| PipelineError::JobCancelled)?
    }
}

/// Bounded async worker pool.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    permits: Arc<Semaphore>,
    max_workers: usize,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create the pool and start its dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: WorkerPoolConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            accepting: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            next_sequence: AtomicU64::new(0),
            total: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            started_at: Instant::now(),
        });
        let permits = Arc::new(Semaphore::new(max_workers));
        let dispatcher = tokio::spawn(dispatch_loop(Arc::clone(&shared), Arc::clone(&permits)));

        info!(max_workers, "Worker pool started");

        Self {
            shared,
            permits,
            max_workers,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Enqueue a job. Higher `priority` runs first; equal priorities run in
    /// submission order.
    pub fn submit<F, T>(&self, kind: JobKind, priority: u8, job: F) -> PipelineResult<JobHandle<T>>
    where
        F: Future<Output = PipelineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let run: BoxedJob = Box::pin(async move {
            let result = job.await;
            match &result {
                Ok(_) => shared.completed.fetch_add(1, Ordering::Relaxed),
                Err(_) => shared.failed.fetch_add(1, Ordering::Relaxed),
            };
            // Receiver may have been dropped; the result is discarded then.
            let _ = sender.send(result);
        });

        // `shutdown` flips `accepting` under this lock, so a job is either
        // queued before the final drain or rejected here.
        let sequence = {
            let mut queue = self.shared.queue.lock();
            if !self.shared.accepting.load(Ordering::Acquire) {
                return Err(PipelineError::WorkerPoolShutdown);
            }
            let sequence = self.shared.next_sequence.fetch_add(1, Ordering::Relaxed);
            queue.push(QueuedJob {
                priority,
                sequence,
                kind,
                run,
            });
            sequence
        };
        self.shared.total.fetch_add(1, Ordering::Relaxed);
        self.shared.notify.notify_one();

        debug!(kind = kind.as_str(), priority, sequence, "Job submitted");
        Ok(JobHandle { kind, receiver })
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> WorkerPoolStats {
        let completed = self.shared.completed.load(Ordering::Relaxed);
        let elapsed = self.shared.started_at.elapsed().as_secs_f64();
        WorkerPoolStats {
            max_workers: self.max_workers,
            total_jobs: self.shared.total.load(Ordering::Relaxed),
            completed_jobs: completed,
            failed_jobs: self.shared.failed.load(Ordering::Relaxed),
            active_workers: self.shared.active.load(Ordering::Relaxed),
            queued_jobs: self.shared.queue.lock().len(),
            throughput: if elapsed > 0.0 {
                completed as f64 / elapsed
            } else {
                0.0
            },
        }
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting jobs, drain the queue and wait for in-flight jobs.
    pub async fn shutdown(&self) {
        {
            let _queue = self.shared.queue.lock();
            self.shared.accepting.store(false, Ordering::Release);
        }
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker pool dispatcher ended abnormally");
            }
        }

        // Jobs queued between the dispatcher's last pop and its exit.
        let stragglers = std::mem::take(&mut *self.shared.queue.lock()).into_sorted_vec();
        for job in stragglers.into_iter().rev() {
            job.run.await;
        }

        // Every permit back means every job has finished.
        match self.permits.acquire_many(self.max_workers as u32).await {
            Ok(permits) => {
                permits.forget();
                self.permits.close();
                info!(
                    completed = self.shared.completed.load(Ordering::Relaxed),
                    failed = self.shared.failed.load(Ordering::Relaxed),
                    "Worker pool shut down"
                );
            }
            Err(_) => debug!("Worker pool already shut down"),
        }
    }
}

async fn dispatch_loop(shared: Arc<PoolShared>, permits: Arc<Semaphore>) {
    loop {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            return;
        };

        let job = loop {
            let notified = shared.notify.notified();
            if let Some(job) = shared.queue.lock().pop() {
                break Some(job);
            }
            if shared.closed.load(Ordering::Acquire) {
                break None;
            }
            notified.await;
        };
        let Some(job) = job else {
            return;
        };

        shared.active.fetch_add(1, Ordering::Relaxed);
        let task_shared = Arc::clone(&shared);
        let kind = job.kind;
        tokio::spawn(async move {
            // Run in a nested task so a panicking job still releases its slot.
            if let Err(e) = tokio::spawn(job.run).await {
                task_shared.failed.fetch_add(1, Ordering::Relaxed);
                warn!(kind = kind.as_str(), error = %e, "Job aborted");
            }
            task_shared.active.fetch_sub(1, Ordering::Relaxed);
            drop(permit);
        });
    }
}
