//! Keyed job queue with a fixed pool of workers.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backlog::{Backlog, EnqueueOutcome};
use crate::job::{PendingJob, boxed_action};
use crate::{BoxError, Job, JobContext, JobQueueConfig, JobQueueError};

/// Point-in-time view of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs waiting for a worker.
    pub pending: usize,
    /// Jobs currently executing.
    pub active: usize,
    /// Jobs accepted into the backlog, including those admitted by eviction.
    pub admitted: u64,
    /// Jobs dropped because their key was already pending or running.
    pub deduplicated: u64,
    /// Pending jobs evicted to make room for newer ones.
    pub evicted: u64,
    /// Jobs that returned `Ok`.
    pub succeeded: u64,
    /// Jobs that returned an error or panicked.
    pub failed: u64,
    /// Jobs cancelled after running past `job_timeout`.
    pub timed_out: u64,
}

#[derive(Default)]
struct Counters {
    admitted: AtomicU64,
    deduplicated: AtomicU64,
    evicted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

/// State shared between the queue handle and its workers.
struct Shared {
    name: String,
    config: JobQueueConfig,
    backlog: Mutex<Backlog>,
    notify: Notify,
    shutdown: CancellationToken,
    counters: Counters,
}

impl Shared {
    fn backlog(&self) -> MutexGuard<'_, Backlog> {
        // Backlog methods never panic midway, so a poisoned lock still holds
        // consistent state.
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self, job: PendingJob) -> EnqueueOutcome {
        let key = job.key.clone();
        let outcome = self.backlog().admit(job);

        match &outcome {
            EnqueueOutcome::Admitted => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                self.notify.notify_one();
            }
            EnqueueOutcome::AdmittedWithEviction { evicted_key } => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue = %self.name,
                    evicted_key = %evicted_key,
                    max_queue_length = self.config.max_queue_length,
                    "Queue full, evicted oldest pending job"
                );
                self.notify.notify_one();
            }
            EnqueueOutcome::Duplicate => {
                self.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
                debug!(queue = %self.name, key = %key, "Job already pending or running, skipped");
            }
            EnqueueOutcome::Closed => {
                debug!(queue = %self.name, key = %key, "Queue closed, job dropped");
            }
        }

        outcome
    }

    async fn run_job(&self, worker_id: usize, job: PendingJob) {
        let PendingJob { key, action } = job;
        let token = self.shutdown.child_token();
        let ctx = JobContext::new(key.clone(), token.clone());
        let started = Instant::now();

        debug!(queue = %self.name, worker_id = worker_id, key = %key, "Worker claimed job");

        // Calling the action happens inside the first poll so a panicking
        // closure body is caught as well.
        let execution = AssertUnwindSafe(async move { action(ctx).await }).catch_unwind();

        match tokio::time::timeout(self.config.job_timeout, execution).await {
            Ok(Ok(Ok(()))) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    queue = %self.name,
                    key = %key,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
            }
            Ok(Ok(Err(e))) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(queue = %self.name, key = %key, error = %e, "Job failed");
            }
            Ok(Err(panic)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    queue = %self.name,
                    key = %key,
                    reason = %panic_reason(&*panic),
                    "Job panicked"
                );
            }
            Err(_) => {
                // The job future is already dropped; the token reaches
                // anything it spawned.
                token.cancel();
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue = %self.name,
                    timeout_ms = self.config.job_timeout.as_millis() as u64,
                    "Job timeout: {}",
                    key
                );
            }
        }

        self.backlog().finish(&key);
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn run_worker(shared: Arc<Shared>, worker_id: usize) {
    debug!(queue = %shared.name, worker_id = worker_id, "Worker starting");

    loop {
        let (claimed, more_pending) = {
            let mut backlog = shared.backlog();
            let claimed = backlog.claim();
            (claimed, backlog.pending_len() > 0)
        };

        match claimed {
            Some(job) => {
                // Notify keeps at most one permit, so wakeups for several
                // admissions can collapse into one. Pass the rest on.
                if more_pending {
                    shared.notify.notify_one();
                }
                shared.run_job(worker_id, job).await;
            }
            None => {
                tokio::select! {
                    _ = shared.shutdown.cancelled() => {
                        debug!(
                            queue = %shared.name,
                            worker_id = worker_id,
                            "Worker received shutdown signal"
                        );
                        break;
                    }
                    _ = shared.notify.notified() => {}
                }
            }
        }
    }

    debug!(queue = %shared.name, worker_id = worker_id, "Worker shutting down");
}

/// An in-process job queue that deduplicates by key.
///
/// The queue spawns `max_concurrency` worker tasks on the Tokio runtime it is
/// built in. Each worker claims the oldest pending job, runs it under the
/// configured timeout, releases its key and claims the next one.
///
/// # Guarantees
///
/// - At most one job per key is pending or running at any time. Enqueueing a
///   key that is already pending or running drops the new job.
/// - The backlog never exceeds `max_queue_length`; when full, the oldest
///   pending job is evicted to admit the new one.
/// - At most `max_concurrency` jobs execute at once, started in FIFO order.
/// - A job running past `job_timeout` is dropped, its [`JobContext`] token is
///   cancelled and its slot is freed.
/// - Job errors, panics and timeouts are logged and never reach the caller.
///
/// # Example
///
/// ```rust,no_run
/// use keyed_job_queue::{JobQueue, JobQueueConfig};
///
/// # async fn example() -> Result<(), keyed_job_queue::JobQueueError> {
/// let queue = JobQueue::new("sheets", JobQueueConfig::spreadsheet_sync())?;
///
/// queue.enqueue("sheets:event:42", |_ctx| async move {
///     // Re-read event 42 and rewrite its tab
///     Ok(())
/// });
///
/// queue.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct JobQueue {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.shared.name)
            .field("config", &self.shared.config)
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl JobQueue {
    /// Create a builder for configuring a job queue.
    pub fn builder() -> JobQueueBuilder {
        JobQueueBuilder::default()
    }

    /// Create a queue and spawn its workers on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError`] if any setting in `config` is zero or no
    /// Tokio runtime is available.
    #[must_use = "job queue must be stored to keep workers running"]
    pub fn new(name: impl Into<String>, config: JobQueueConfig) -> Result<Self, JobQueueError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| JobQueueError::NoRuntime)?;

        let shared = Arc::new(Shared {
            name: name.into(),
            backlog: Mutex::new(Backlog::new(config.max_queue_length)),
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
            counters: Counters::default(),
            config,
        });

        let workers = (0..shared.config.max_concurrency)
            .map(|worker_id| runtime.spawn(run_worker(Arc::clone(&shared), worker_id)))
            .collect();

        Ok(Self { shared, workers })
    }

    /// Offer a job under `key`.
    ///
    /// Returns immediately. The action runs later on a worker unless a job
    /// with the same key is already pending or running, in which case this
    /// action is dropped and the existing job stands in for it.
    pub fn enqueue<F, Fut>(&self, key: impl Into<String>, action: F) -> EnqueueOutcome
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.shared.admit(PendingJob {
            key: key.into(),
            action: boxed_action(action),
        })
    }

    /// Offer a [`Job`] under its own key.
    pub fn enqueue_job<J: Job>(&self, job: J) -> EnqueueOutcome {
        let key = job.key();
        self.enqueue(key, move |ctx| job.execute(ctx))
    }

    /// Name used in this queue's log lines.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Settings this queue was built with.
    pub fn config(&self) -> &JobQueueConfig {
        &self.shared.config
    }

    /// Whether a job under `key` is pending or running.
    pub fn contains_key(&self, key: &str) -> bool {
        self.shared.backlog().contains_key(key)
    }

    /// Snapshot of backlog size, active jobs and cumulative counters.
    pub fn stats(&self) -> QueueStats {
        let (pending, active) = {
            let backlog = self.shared.backlog();
            (backlog.pending_len(), backlog.active_count())
        };
        let counters = &self.shared.counters;

        QueueStats {
            pending,
            active,
            admitted: counters.admitted.load(Ordering::Relaxed),
            deduplicated: counters.deduplicated.load(Ordering::Relaxed),
            evicted: counters.evicted.load(Ordering::Relaxed),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            timed_out: counters.timed_out.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting jobs and drop everything still pending.
    ///
    /// Running jobs see their token cancelled; workers exit once their
    /// current job returns. Returns the number of pending jobs dropped.
    pub fn close(&self) -> usize {
        let dropped = {
            let mut backlog = self.shared.backlog();
            if backlog.is_closed() {
                return 0;
            }
            backlog.close()
        };

        if !dropped.is_empty() {
            warn!(
                queue = %self.shared.name,
                dropped = dropped.len(),
                "Dropping pending jobs on close"
            );
        }
        self.shared.shutdown.cancel();
        dropped.len()
    }

    /// Gracefully shutdown the queue.
    ///
    /// Pending jobs are dropped, then this waits for running jobs to return
    /// (each still bounded by the job timeout).
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::WorkerPanicked`] if a worker task panicked.
    pub async fn shutdown(mut self) -> Result<(), JobQueueError> {
        self.close();

        for (idx, handle) in std::mem::take(&mut self.workers).into_iter().enumerate() {
            handle.await.map_err(|e| JobQueueError::WorkerPanicked {
                reason: format!("worker {idx} of queue {}: {e}", self.shared.name),
            })?;
        }

        info!(queue = %self.shared.name, "All workers shut down successfully");
        Ok(())
    }

    /// Attempt to shutdown an `Arc<JobQueue>` if it's the last reference.
    ///
    /// If other references exist, logs a warning and returns without
    /// shutting down.
    pub async fn shutdown_arc(self: Arc<Self>) {
        match Arc::try_unwrap(self) {
            Ok(queue) => {
                let name = queue.name().to_string();
                if let Err(e) = queue.shutdown().await {
                    error!(queue = %name, error = %e, "Error shutting down job queue");
                }
            }
            Err(queue) => {
                warn!(
                    queue = %queue.name(),
                    "Could not shutdown job queue - still has active references"
                );
            }
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        // Workers hold their own reference to the shared state; without this
        // they would idle forever.
        self.close();
    }
}

/// Builder for [`JobQueue`].
///
/// Starts from [`JobQueueConfig::default`] and the name `"jobs"`.
#[derive(Debug, Clone)]
pub struct JobQueueBuilder {
    name: String,
    config: JobQueueConfig,
}

impl Default for JobQueueBuilder {
    fn default() -> Self {
        Self {
            name: "jobs".to_string(),
            config: JobQueueConfig::default(),
        }
    }
}

impl JobQueueBuilder {
    /// Set the queue name used in log lines.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace every setting with `config`.
    pub fn config(mut self, config: JobQueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of worker tasks.
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.max_concurrency = max_concurrency;
        self
    }

    /// Set the backlog bound.
    pub fn max_queue_length(mut self, max_queue_length: usize) -> Self {
        self.config.max_queue_length = max_queue_length;
        self
    }

    /// Set how long a job may run before it is cancelled.
    pub fn job_timeout(mut self, job_timeout: Duration) -> Self {
        self.config.job_timeout = job_timeout;
        self
    }

    /// Build the queue and spawn its workers.
    ///
    /// # Errors
    ///
    /// See [`JobQueue::new`].
    pub fn build(self) -> Result<JobQueue, JobQueueError> {
        JobQueue::new(self.name, self.config)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
