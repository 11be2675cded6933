//! Job contract and the type-erased form the queue stores.

use std::future::Future;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::BoxError;

/// Context handed to a job when a worker starts it.
///
/// The token is cancelled when the job exceeds the queue's timeout or the
/// queue shuts down. Long jobs, and any tasks they spawn themselves, should
/// watch it.
#[derive(Clone, Debug)]
pub struct JobContext {
    key: String,
    cancellation_token: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(key: String, cancellation_token: CancellationToken) -> Self {
        Self {
            key,
            cancellation_token,
        }
    }

    /// Deduplication key the job was enqueued under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Resolves once the job has been cancelled.
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await;
    }

    /// Token to pass into work the job spawns on its own.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }
}

/// Trait for named jobs that carry their own deduplication key.
///
/// Closures can be enqueued directly with [`JobQueue::enqueue`]; implement
/// this trait when a job type is reused across call sites.
///
/// Jobs deduplicated away are dropped without running, and the job already
/// queued under the same key runs instead. A job should therefore load the
/// current state of whatever it synchronizes inside `execute`, not carry it
/// in from enqueue time.
///
/// [`JobQueue::enqueue`]: crate::JobQueue::enqueue
///
/// # Example
///
/// ```rust
/// use keyed_job_queue::{BoxError, Job, JobContext};
///
/// struct RefreshTab {
///     event_id: String,
/// }
///
/// impl Job for RefreshTab {
///     fn key(&self) -> String {
///         format!("sheets:event:{}", self.event_id)
///     }
///
///     async fn execute(self, _ctx: JobContext) -> Result<(), BoxError> {
///         // Re-read the event and rewrite its tab
///         Ok(())
///     }
/// }
/// ```
pub trait Job: Send + 'static {
    /// Deduplication identity of the external effect this job produces.
    fn key(&self) -> String;

    /// Perform the job. Errors are logged by the queue and never reach the
    /// code that enqueued it.
    fn execute(self, ctx: JobContext) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// Boxed job body as stored in the backlog.
pub(crate) type JobAction =
    Box<dyn FnOnce(JobContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + 'static>;

/// Erase a closure into a [`JobAction`].
pub(crate) fn boxed_action<F, Fut>(action: F) -> JobAction
where
    F: FnOnce(JobContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Box::new(move |ctx| Box::pin(action(ctx)))
}

/// One admitted job waiting in the backlog.
pub(crate) struct PendingJob {
    pub(crate) key: String,
    pub(crate) action: JobAction,
}

impl std::fmt::Debug for PendingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingJob").field("key", &self.key).finish()
    }
}
