//! Lazily built, process-shared clients.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, error, info};

use crate::{BoxError, ResourceError};

/// What happens to the memoized build after it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// A failed build stays failed; every later caller gets the same error.
    #[default]
    Sticky,
    /// The memo is cleared once a build fails so the next caller starts a
    /// fresh build. Callers already waiting on the failed build still see
    /// its error.
    Retry,
}

type BuildOutput<T> = Result<Arc<T>, ResourceError>;
type BuildFuture<T> = Shared<BoxFuture<'static, BuildOutput<T>>>;
type BuildFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<T>, BoxError>> + Send + Sync>;

/// An expensive shared client that is built once, on first use.
///
/// The first call to [`get`](Self::get) stores the build future before it
/// is awaited, so callers racing on a cold resource all wait on that one
/// build and receive the same `Arc`.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use keyed_job_queue::LazyResource;
///
/// struct SheetsClient;
///
/// # async fn example() -> Result<(), keyed_job_queue::ResourceError> {
/// let sheets = LazyResource::new("sheets-client", || async {
///     // Load credentials, authenticate...
///     Ok(Arc::new(SheetsClient))
/// });
///
/// let client = sheets.get().await?;
/// # Ok(())
/// # }
/// ```
pub struct LazyResource<T: ?Sized> {
    name: &'static str,
    build: BuildFn<T>,
    policy: FailurePolicy,
    memo: Mutex<Option<BuildFuture<T>>>,
    builds: AtomicUsize,
}

impl<T: ?Sized> std::fmt::Debug for LazyResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyResource")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("builds", &self.builds.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> LazyResource<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    /// Create a resource that runs `build` on first use.
    pub fn new<F, Fut>(name: &'static str, build: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<T>, BoxError>> + Send + 'static,
    {
        Self {
            name,
            build: Arc::new(move || build().boxed()),
            policy: FailurePolicy::default(),
            memo: Mutex::new(None),
            builds: AtomicUsize::new(0),
        }
    }

    /// Wrap an already constructed value.
    pub fn from_value(name: &'static str, value: Arc<T>) -> Self {
        Self::new(name, move || {
            let value = Arc::clone(&value);
            async move { Ok(value) }
        })
    }

    /// Choose what happens after a failed build. Defaults to
    /// [`FailurePolicy::Sticky`].
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of times the construction routine has been started.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Whether a build has completed successfully.
    pub fn is_ready(&self) -> bool {
        self.memo()
            .as_ref()
            .and_then(|build| build.peek())
            .is_some_and(|output| output.is_ok())
    }

    /// Get the shared value, building it if this is the first call.
    ///
    /// # Errors
    ///
    /// Returns the [`ResourceError`] of the build this call waited on.
    pub async fn get(&self) -> Result<Arc<T>, ResourceError> {
        let build = self.memoized_build();
        let output = build.clone().await;

        if output.is_err() && self.policy == FailurePolicy::Retry {
            let mut memo = self.memo();
            // Only forget this build; a retry may already be in flight.
            if memo.as_ref().is_some_and(|current| current.ptr_eq(&build)) {
                *memo = None;
                debug!(resource = self.name, "Cleared failed build, next caller retries");
            }
        }

        output
    }

    fn memo(&self) -> MutexGuard<'_, Option<BuildFuture<T>>> {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn memoized_build(&self) -> BuildFuture<T> {
        let mut memo = self.memo();
        if let Some(build) = memo.as_ref() {
            return build.clone();
        }

        self.builds.fetch_add(1, Ordering::SeqCst);
        debug!(resource = self.name, "Building shared resource");

        let name = self.name;
        let routine = Arc::clone(&self.build);
        // Called inside the future: a routine that panics before returning
        // its future must be memoized as a failure too.
        let build = AssertUnwindSafe(async move { (*routine)().await })
            .catch_unwind()
            .map(move |result| match result {
                Ok(Ok(value)) => {
                    info!(resource = name, "Shared resource ready");
                    Ok(value)
                }
                Ok(Err(e)) => {
                    error!(resource = name, error = %e, "Failed to build shared resource");
                    Err(ResourceError::Build {
                        resource: name,
                        source: Arc::from(e),
                    })
                }
                Err(_) => {
                    error!(resource = name, "Shared resource build panicked");
                    Err(ResourceError::Panicked { resource: name })
                }
            })
            .boxed()
            .shared();

        *memo = Some(build.clone());
        build
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
