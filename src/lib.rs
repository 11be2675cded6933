//! An in-process background job queue keyed by deduplication identity.
//!
//! Request handlers finish their response, hand slow side effects
//! (spreadsheet rewrites, calendar upserts, mail) to a [`JobQueue`] and return
//! without waiting. The queue:
//!
//! - drops a job whose key is already pending or running,
//! - bounds its backlog, evicting the oldest pending job when full,
//! - runs at most `max_concurrency` jobs at once, oldest first,
//! - cancels any job that outlives `job_timeout`.
//!
//! Shared clients are built once through a [`LazyResource`], however many
//! jobs race to use them first.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────┐
//! enqueue(key) ──►│ JobQueue                 │     ┌──────────────┐
//!                 │  backlog (dedup, bound)  │────►│ worker 0..N  │──► job(ctx)
//!                 └──────────────────────────┘     └──────────────┘       │
//!                                                                         ▼
//!                                                       LazyResource::get()
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use keyed_job_queue::{JobQueue, LazyResource};
//!
//! struct SheetsClient;
//!
//! impl SheetsClient {
//!     async fn rewrite(&self, _tab: &str) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), keyed_job_queue::JobQueueError> {
//!     let client = Arc::new(LazyResource::new("sheets", || async {
//!         Ok(Arc::new(SheetsClient))
//!     }));
//!
//!     let queue = JobQueue::builder()
//!         .name("sheets")
//!         .max_concurrency(1)
//!         .max_queue_length(100)
//!         .job_timeout(Duration::from_secs(120))
//!         .build()?;
//!
//!     queue.enqueue("sheets:event:42", move |_ctx| async move {
//!         client.get().await?.rewrite("event-42").await;
//!         Ok(())
//!     });
//!
//!     tokio::time::sleep(Duration::from_millis(100)).await;
//!
//!     queue.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod backlog;
mod config;
mod error;
mod job;
mod queue;
mod resource;
pub mod services;

pub use backlog::EnqueueOutcome;
pub use config::{JobQueueConfig, SchedulerConfig};
pub use error::{BoxError, ConfigError, JobQueueError, ResourceError};
pub use job::{Job, JobContext};
pub use queue::{JobQueue, JobQueueBuilder, QueueStats};
pub use resource::{FailurePolicy, LazyResource};
pub use services::BackOffice;
