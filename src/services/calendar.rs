//! Calendar sync for ticketed events.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::debug;

use crate::{BoxError, EnqueueOutcome, JobQueue, LazyResource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEntry {
    pub event_id: String,
    pub title: String,
    pub location: Option<String>,
    pub starts_at: SystemTime,
    pub ends_at: SystemTime,
    pub cancelled: bool,
}

/// Authenticated calendar client.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    /// Create the event, or update it if one exists for `entry.event_id`.
    async fn upsert_event(&self, entry: &CalendarEntry) -> Result<(), BoxError>;

    /// Remove the event if present.
    async fn remove_event(&self, event_id: &str) -> Result<(), BoxError>;
}

#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// `None` when the event no longer exists.
    async fn calendar_entry(&self, event_id: &str) -> Result<Option<CalendarEntry>, BoxError>;
}

/// Keeps the public calendar in step with the event list.
pub struct CalendarSync {
    queue: JobQueue,
    client: Arc<LazyResource<dyn CalendarApi>>,
    source: Arc<dyn CalendarSource>,
}

impl CalendarSync {
    pub fn new(
        queue: JobQueue,
        client: Arc<LazyResource<dyn CalendarApi>>,
        source: Arc<dyn CalendarSource>,
    ) -> Self {
        Self {
            queue,
            client,
            source,
        }
    }

    /// Schedule an upsert (or removal, for deleted and cancelled events).
    pub fn sync_event(&self, event_id: &str) -> EnqueueOutcome {
        let event_id = event_id.to_string();
        let client = Arc::clone(&self.client);
        let source = Arc::clone(&self.source);

        self.queue
            .enqueue(format!("calendar:event:{event_id}"), move |ctx| async move {
                let entry = source.calendar_entry(&event_id).await?;
                if ctx.is_cancelled() {
                    debug!(event_id = %event_id, "Calendar sync cancelled before write");
                    return Ok(());
                }

                let calendar = client.get().await?;
                match entry {
                    Some(entry) if !entry.cancelled => calendar.upsert_event(&entry).await,
                    _ => calendar.remove_event(&event_id).await,
                }
            })
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub(crate) fn into_queue(self) -> JobQueue {
        self.queue
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
