//! # Transaction Batcher
//!
//! Accumulates validated transactions and turns them into batches.
//!
//! ## Formation
//!
//! | Trigger | Condition |
//! |---------|-----------|
//! | `SizeThreshold` | pending ≥ `max_batch_size` |
//! | `PriorityThreshold` | pending ≥ `min_batch_size` and head priority ≥ `priority_threshold` |
//! | `WaitTimer` | timer fired and pending ≥ `min_batch_size` |
//! | `Flush` | shutdown drains whatever is left |
//!
//! Formation needs one of `max_in_flight_batches` permits. Selection and
//! removal from the pending queue happen under one lock, so a transaction
//! lands in exactly one batch.
//!
//! ## Execution
//!
//! ```text
//! [PENDING] → validate (signatures + ledger) → aggregate → wait commit turn
//!           → update DAG → propagate → [COMMITTED]
//!
//! any step fails ──→ [FAILED] (transactions recorded on the batch, not requeued)
//! ```
//!
//! Each step is a worker pool job, routed through the load balancer when
//! nodes are registered. Commits follow formation order even when several
//! batches execute at once.

use crate::aggregation::SignatureAggregator;
use crate::balancer::{LoadBalancer, RouteRequest};
use crate::config::BatcherConfig;
use crate::domain::{
    select_transactions, Batch, BatchStatus, FormationTrigger, JobKind, PendingQueue,
    PipelineError, PipelineResult, SelectionLimits, Transaction,
};
use crate::ports::outbound::{LedgerEngine, SignatureVerifier, TimeSource, ValidationVerdict};
use crate::worker_pool::WorkerPool;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use shared_bus::{EventPublisher, PipelineEvent};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Collaborators the batcher executes against.
#[derive(Clone)]
pub struct BatcherContext {
    pub pool: Arc<WorkerPool>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub ledger: Arc<dyn LedgerEngine>,
    /// Routes batch steps to worker nodes. Steps run locally while no node
    /// is registered.
    pub balancer: Option<Arc<LoadBalancer>>,
    pub events: Arc<dyn EventPublisher>,
    pub clock: Arc<dyn TimeSource>,
}

/// Batcher statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatcherStats {
    pub pending_transactions: usize,
    /// Sum of gas limits waiting in the queue.
    pub pending_gas: u64,
    pub active_batches: usize,
    pub batches_created: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub transactions_committed: u64,
    pub transactions_failed: u64,
    pub avg_batch_duration_ms: f64,
}

#[derive(Default)]
struct BatcherCounters {
    batches_created: AtomicU64,
    batches_committed: AtomicU64,
    batches_failed: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_failed: AtomicU64,
    total_duration_ms: AtomicU64,
}

struct QueueState {
    pending: PendingQueue,
    next_batch_sequence: u64,
}

/// Releases commits in batch sequence order.
struct CommitSequencer {
    next: Mutex<u64>,
    notify: Notify,
}

impl CommitSequencer {
    async fn wait_turn(&self, sequence: u64) {
        loop {
            let notified = self.notify.notified();
            if *self.next.lock() == sequence {
                return;
            }
            notified.await;
        }
    }

    fn advance(&self) {
        *self.next.lock() += 1;
        self.notify.notify_waiters();
    }
}

struct BatcherInner {
    config: BatcherConfig,
    ctx: BatcherContext,
    aggregator: Arc<SignatureAggregator>,
    queue: Mutex<QueueState>,
    timer_due: AtomicBool,
    active: RwLock<HashMap<Uuid, Batch>>,
    archive: Mutex<VecDeque<Batch>>,
    in_flight: Arc<Semaphore>,
    sequencer: CommitSequencer,
    executions: Mutex<Vec<JoinHandle<()>>>,
    counters: BatcherCounters,
}

/// Adaptive batch formation engine.
#[derive(Clone)]
pub struct TransactionBatcher {
    inner: Arc<BatcherInner>,
}

impl TransactionBatcher {
    pub fn new(config: BatcherConfig, ctx: BatcherContext) -> Self {
        let aggregator = Arc::new(SignatureAggregator::new(Arc::clone(&ctx.verifier)));
        let permits = config.max_in_flight_batches.max(1);
        Self {
            inner: Arc::new(BatcherInner {
                aggregator,
                queue: Mutex::new(QueueState {
                    pending: PendingQueue::new(),
                    next_batch_sequence: 0,
                }),
                timer_due: AtomicBool::new(false),
                active: RwLock::new(HashMap::new()),
                archive: Mutex::new(VecDeque::new()),
                in_flight: Arc::new(Semaphore::new(permits)),
                sequencer: CommitSequencer {
                    next: Mutex::new(0),
                    notify: Notify::new(),
                },
                executions: Mutex::new(Vec::new()),
                counters: BatcherCounters::default(),
                config,
                ctx,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    // =========================================================================
    // INTAKE
    // =========================================================================

    /// Validate and enqueue a transaction, then form any batch that is due.
    ///
    /// Rejected transactions leave the queue untouched.
    pub fn add_transaction(&self, mut tx: Transaction) -> PipelineResult<Uuid> {
        if let Err(e) = tx.validate(self.inner.config.max_gas_limit) {
            debug!(tx_id = %tx.id, error = %e, "Transaction rejected");
            return Err(e);
        }
        if tx.submitted_at == 0 {
            tx.submitted_at = self.inner.ctx.clock.now();
        }

        let id = tx.id;
        let priority = tx.priority;
        let pending = {
            let mut queue = self.inner.queue.lock();
            queue.pending.push(tx);
            queue.pending.len()
        };
        debug!(tx_id = %id, priority, pending, "Transaction queued");

        self.form_ready_batches();
        Ok(id)
    }

    /// Called by the wait timer.
    pub fn on_wait_timer(&self) {
        self.inner.timer_due.store(true, Ordering::Release);
        self.form_ready_batches();
    }

    /// Run the wait timer until `shutdown` flips to true.
    pub fn spawn_wait_timer(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let batcher = self.clone();
        let period = self.inner.config.max_wait;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => batcher.on_wait_timer(),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Batch wait timer stopped");
        })
    }

    /// Form batches until no trigger holds or every permit is taken.
    fn form_ready_batches(&self) {
        loop {
            let Ok(permit) = Arc::clone(&self.inner.in_flight).try_acquire_owned() else {
                return;
            };
            let batch = {
                let mut queue = self.inner.queue.lock();
                let Some(trigger) = self.inner.due_trigger(&queue.pending) else {
                    return;
                };
                match self.inner.form_batch(&mut queue, trigger) {
                    Some(batch) => batch,
                    None => return,
                }
            };
            self.spawn_execution(batch, permit);
        }
    }

    /// Turn every pending transaction into batches regardless of size
    /// thresholds. Waits for in-flight permits as needed.
    pub async fn flush(&self) {
        loop {
            let Ok(permit) = Arc::clone(&self.inner.in_flight).acquire_owned().await else {
                return;
            };
            let batch = {
                let mut queue = self.inner.queue.lock();
                if queue.pending.is_empty() {
                    return;
                }
                self.inner.form_batch(&mut queue, FormationTrigger::Flush)
            };
            match batch {
                Some(batch) => self.spawn_execution(batch, permit),
                None => {
                    warn!(
                        pending = self.pending_count(),
                        "Flush could not select any pending transaction"
                    );
                    return;
                }
            }
        }
    }

    /// Wait until every spawned batch execution has finished, including
    /// batches formed while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.inner.executions.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Batch execution task ended abnormally");
                }
            }
        }
    }

    fn spawn_execution(&self, batch: Batch, permit: OwnedSemaphorePermit) {
        let handle = tokio::spawn(self.clone().execute(batch, permit));
        let mut executions = self.inner.executions.lock();
        executions.retain(|h| !h.is_finished());
        executions.push(handle);
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    async fn execute(self, mut batch: Batch, permit: OwnedSemaphorePermit) {
        let inner = &self.inner;
        let started = Instant::now();
        inner
            .ctx
            .events
            .publish(PipelineEvent::BatchCreated {
                batch_id: batch.id,
                tx_count: batch.len(),
                total_gas: batch.total_gas,
                trigger: batch.trigger.as_str().to_string(),
            })
            .await;

        let prepared = inner.prepare(&mut batch).await;
        inner.sequencer.wait_turn(batch.sequence).await;
        let outcome = match prepared {
            Ok(()) => inner.commit(&mut batch).await,
            Err(e) => Err(e),
        };
        inner.sequencer.advance();

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        inner.finalize(batch, outcome, duration_ms).await;

        drop(permit);
        self.form_ready_batches();
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.queue.lock().pending.len()
    }

    /// Active or archived batch.
    #[must_use]
    pub fn batch(&self, id: &Uuid) -> Option<Batch> {
        if let Some(batch) = self.inner.active.read().get(id) {
            return Some(batch.clone());
        }
        self.inner
            .archive
            .lock()
            .iter()
            .find(|b| &b.id == id)
            .cloned()
    }

    /// Terminal batches, oldest first.
    #[must_use]
    pub fn archived_batches(&self) -> Vec<Batch> {
        self.inner.archive.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn active_batch_count(&self) -> usize {
        self.inner.active.read().len()
    }

    #[must_use]
    pub fn stats(&self) -> BatcherStats {
        let c = &self.inner.counters;
        let committed = c.batches_committed.load(Ordering::Relaxed);
        let failed = c.batches_failed.load(Ordering::Relaxed);
        let finished = committed + failed;
        let (pending_transactions, pending_gas) = {
            let queue = self.inner.queue.lock();
            (queue.pending.len(), queue.pending.total_gas())
        };
        BatcherStats {
            pending_transactions,
            pending_gas,
            active_batches: self.active_batch_count(),
            batches_created: c.batches_created.load(Ordering::Relaxed),
            batches_committed: committed,
            batches_failed: failed,
            transactions_committed: c.transactions_committed.load(Ordering::Relaxed),
            transactions_failed: c.transactions_failed.load(Ordering::Relaxed),
            avg_batch_duration_ms: if finished > 0 {
                c.total_duration_ms.load(Ordering::Relaxed) as f64 / finished as f64
            } else {
                0.0
            },
        }
    }
}

impl BatcherInner {
    /// First trigger that holds for `pending`, if any.
    fn due_trigger(&self, pending: &PendingQueue) -> Option<FormationTrigger> {
        let len = pending.len();
        if len == 0 {
            return None;
        }
        if len >= self.config.max_batch_size {
            return Some(FormationTrigger::SizeThreshold);
        }
        let urgent = pending
            .top_priority()
            .is_some_and(|p| p >= self.config.priority_threshold);
        if len >= self.config.min_batch_size && urgent {
            return Some(FormationTrigger::PriorityThreshold);
        }
        if self.timer_due.load(Ordering::Acquire) {
            if len >= self.config.min_batch_size {
                return Some(FormationTrigger::WaitTimer);
            }
            // Too few pending: the timer starts over.
            self.timer_due.store(false, Ordering::Release);
        }
        None
    }

    /// Select, remove and register the next batch. Caller holds the queue lock.
    fn form_batch(&self, queue: &mut QueueState, trigger: FormationTrigger) -> Option<Batch> {
        let now = self.ctx.clock.now();
        let keys = {
            let snapshot = queue.pending.snapshot();
            select_transactions(
                &snapshot,
                self.config.selection_strategy,
                SelectionLimits {
                    max_count: self.config.max_batch_size,
                    max_gas: self.config.max_gas_limit,
                },
                now,
            )
        };
        if keys.is_empty() {
            return None;
        }

        let transactions = queue.pending.take(&keys);
        let sequence = queue.next_batch_sequence;
        queue.next_batch_sequence += 1;
        self.timer_due.store(false, Ordering::Release);

        let batch = Batch::new(transactions, trigger, sequence, now);
        self.counters.batches_created.fetch_add(1, Ordering::Relaxed);
        info!(
            batch_id = %batch.id,
            sequence,
            tx_count = batch.len(),
            total_gas = batch.total_gas,
            trigger = trigger.as_str(),
            remaining = queue.pending.len(),
            "Batch formed"
        );
        self.active.write().insert(batch.id, batch.clone());
        Some(batch)
    }

    fn set_status(&self, batch: &mut Batch, status: BatchStatus) {
        batch.status = status;
        if let Some(active) = self.active.write().get_mut(&batch.id) {
            active.status = status;
            active.validated_at = batch.validated_at;
            active.aggregated_signature = batch.aggregated_signature.clone();
        }
    }

    /// Run `make()` as a pool job, on a routed node when any is registered.
    async fn run_step<T, F, Fut>(&self, kind: JobKind, make: F) -> PipelineResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = PipelineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let pool = &self.ctx.pool;
        let priority = self.config.job_priority;
        match &self.ctx.balancer {
            Some(balancer) if balancer.node_count() > 0 => {
                balancer
                    .dispatch(&RouteRequest::any(), |node| {
                        let job = pool.submit(kind, priority, make());
                        async move {
                            debug!(node_id = %node.id, kind = kind.as_str(), "Batch step routed");
                            job?.join().await
                        }
                    })
                    .await
            }
            _ => pool.submit(kind, priority, make())?.join().await,
        }
    }

    /// Validation and aggregation.
    async fn prepare(&self, batch: &mut Batch) -> PipelineResult<()> {
        self.set_status(batch, BatchStatus::Validating);
        let parallel = self
            .config
            .validation_strategy
            .is_parallel(batch.len(), self.config.adaptive_threshold);

        let snapshot = Arc::new(batch.clone());
        let verdict = self
            .run_step(JobKind::Validation, || {
                let batch = Arc::clone(&snapshot);
                let verifier = Arc::clone(&self.ctx.verifier);
                let ledger = Arc::clone(&self.ctx.ledger);
                async move {
                    let invalid = if parallel {
                        batch
                            .transactions
                            .par_iter()
                            .filter(|tx| !verifier.verify(tx))
                            .count()
                    } else {
                        batch
                            .transactions
                            .iter()
                            .filter(|tx| !verifier.verify(tx))
                            .count()
                    };
                    if invalid > 0 {
                        return Ok(ValidationVerdict::invalid(format!(
                            "{invalid} invalid signature(s)"
                        )));
                    }
                    ledger.validate_batch(&batch).await
                }
            })
            .await?;

        if !verdict.is_valid {
            return Err(PipelineError::BatchValidation {
                batch_id: batch.id,
                reason: verdict
                    .error
                    .unwrap_or_else(|| "rejected by ledger".to_string()),
            });
        }
        batch.validated_at = Some(self.ctx.clock.now());
        debug!(batch_id = %batch.id, parallel, "Batch validated");

        self.set_status(batch, BatchStatus::Aggregating);
        let aggregate = self
            .run_step(JobKind::Aggregation, || {
                let batch = Arc::clone(&snapshot);
                let aggregator = Arc::clone(&self.aggregator);
                async move { aggregator.aggregate(&batch.transactions) }
            })
            .await?;
        debug!(
            batch_id = %batch.id,
            algorithm = aggregate.algorithm.as_str(),
            size_reduction_pct = aggregate.size_reduction_pct,
            "Batch signatures aggregated"
        );
        batch.aggregated_signature = Some(aggregate);
        Ok(())
    }

    /// DAG update then propagation, as separate jobs so a propagation retry
    /// never re-inserts the batch.
    async fn commit(&self, batch: &mut Batch) -> PipelineResult<()> {
        self.set_status(batch, BatchStatus::Committing);
        let snapshot = Arc::new(batch.clone());

        self.run_step(JobKind::Commit, || {
            let batch = Arc::clone(&snapshot);
            let ledger = Arc::clone(&self.ctx.ledger);
            async move { ledger.update_dag(&batch).await }
        })
        .await?;

        self.run_step(JobKind::Commit, || {
            let batch = Arc::clone(&snapshot);
            let ledger = Arc::clone(&self.ctx.ledger);
            async move { ledger.propagate(&batch).await }
        })
        .await
    }

    async fn finalize(&self, mut batch: Batch, outcome: PipelineResult<()>, duration_ms: u64) {
        let tx_count = batch.len() as u64;
        let c = &self.counters;
        c.total_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);

        let event = match outcome {
            Ok(()) => {
                batch.status = BatchStatus::Committed;
                batch.committed_at = Some(self.ctx.clock.now());
                c.batches_committed.fetch_add(1, Ordering::Relaxed);
                c.transactions_committed.fetch_add(tx_count, Ordering::Relaxed);
                let algorithm = batch
                    .aggregated_signature
                    .as_ref()
                    .map_or("none", |a| a.algorithm.as_str())
                    .to_string();
                info!(
                    batch_id = %batch.id,
                    sequence = batch.sequence,
                    tx_count,
                    duration_ms,
                    algorithm = %algorithm,
                    "Batch committed"
                );
                PipelineEvent::BatchComplete {
                    batch_id: batch.id,
                    tx_count: batch.len(),
                    duration_ms,
                    algorithm,
                }
            }
            Err(e) => {
                batch.status = BatchStatus::Failed;
                batch.error = Some(e.to_string());
                c.batches_failed.fetch_add(1, Ordering::Relaxed);
                c.transactions_failed.fetch_add(tx_count, Ordering::Relaxed);
                warn!(
                    batch_id = %batch.id,
                    sequence = batch.sequence,
                    tx_count,
                    error = %e,
                    "Batch failed"
                );
                PipelineEvent::BatchError {
                    batch_id: batch.id,
                    tx_count: batch.len(),
                    error: e.to_string(),
                }
            }
        };

        let id = batch.id;
        {
            let mut archive = self.archive.lock();
            archive.push_back(batch);
            while archive.len() > self.config.archive_limit.max(1) {
                archive.pop_front();
            }
        }
        self.active.write().remove(&id);
        self.ctx.events.publish(event).await;
    }
}
