//! Error types for the job queue crate.

use std::error::Error;
use std::sync::Arc;

use thiserror::Error;

/// Error type returned by job bodies.
///
/// Boxed so that jobs can use `?` on any error type their collaborators return.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Errors that can occur when building or shutting down a job queue.
#[derive(Debug, Error)]
pub enum JobQueueError {
    /// Queue requires at least one concurrent worker.
    #[error("Invalid configuration: max_concurrency must be greater than 0")]
    ConcurrencyMustBePositive,

    /// Queue requires room for at least one pending job.
    #[error("Invalid configuration: max_queue_length must be greater than 0")]
    QueueLengthMustBePositive,

    /// Queue requires a non-zero job timeout.
    #[error("Invalid configuration: job_timeout must be greater than 0")]
    TimeoutMustBePositive,

    /// Workers are spawned on the Tokio runtime the queue is built in.
    #[error("Job queue must be built inside a Tokio runtime")]
    NoRuntime,

    /// A worker panicked outside of job execution.
    #[error("Worker panicked: {reason}")]
    WorkerPanicked { reason: String },
}

/// Failure to build a [`LazyResource`](crate::LazyResource).
///
/// Cloneable so one failed build can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    /// The construction routine returned an error.
    #[error("Failed to build resource {resource}: {source}")]
    Build {
        resource: &'static str,
        #[source]
        source: Arc<dyn Error + Send + Sync + 'static>,
    },

    /// The construction routine panicked.
    #[error("Resource {resource} panicked while building")]
    Panicked { resource: &'static str },
}

/// Errors raised while loading scheduler configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A loaded queue section does not pass queue validation.
    #[error("Invalid [{section}] config: {source}")]
    Invalid {
        section: &'static str,
        #[source]
        source: JobQueueError,
    },
}
