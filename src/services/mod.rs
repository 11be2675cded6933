//! Back-office subsystems that push data to external services.
//!
//! Each subsystem owns its own [`JobQueue`] so a slow provider only delays
//! its own work, and reaches its client through a shared [`LazyResource`].
//!
//! This module provides:
//! - [`SheetSync`] - Event rosters and the member directory in a spreadsheet
//! - [`CalendarSync`] - Public calendar entries for events
//! - [`Mailer`] - Transactional mail
//! - [`BackOffice`] - Wires the three together from a [`SchedulerConfig`]

use std::sync::Arc;

use tracing::info;

use crate::{JobQueue, JobQueueError, LazyResource, SchedulerConfig};

mod calendar;
mod mail;
mod sheets;

pub use calendar::{CalendarApi, CalendarEntry, CalendarSource, CalendarSync};
pub use mail::{MailComposer, MailMessage, MailRequest, MailTransport, Mailer};
pub use sheets::{
    Attendee, EventRoster, MemberRecord, RosterSource, SheetSync, SheetsApi, event_tab,
};

/// Shared clients, built on first use.
#[derive(Clone)]
pub struct BackOfficeClients {
    pub sheets: Arc<LazyResource<dyn SheetsApi>>,
    pub calendar: Arc<LazyResource<dyn CalendarApi>>,
    pub mail: Arc<LazyResource<dyn MailTransport>>,
}

/// Where jobs read current state from.
#[derive(Clone)]
pub struct BackOfficeSources {
    pub roster: Arc<dyn RosterSource>,
    pub calendar: Arc<dyn CalendarSource>,
    pub mail: Arc<dyn MailComposer>,
}

/// All back-office subsystems, built once at startup and handed to the
/// request handlers that need them.
pub struct BackOffice {
    pub sheets: SheetSync,
    pub calendar: CalendarSync,
    pub mail: Mailer,
}

impl BackOffice {
    /// Build one queue per subsystem.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError`] if a queue config is invalid or no Tokio
    /// runtime is running.
    pub fn new(
        config: &SchedulerConfig,
        clients: BackOfficeClients,
        sources: BackOfficeSources,
    ) -> Result<Self, JobQueueError> {
        let sheets = SheetSync::new(
            JobQueue::new("sheets", config.sheets.clone())?,
            clients.sheets,
            sources.roster,
        );
        let calendar = CalendarSync::new(
            JobQueue::new("calendar", config.calendar.clone())?,
            clients.calendar,
            sources.calendar,
        );
        let mail = Mailer::new(
            JobQueue::new("mail", config.mail.clone())?,
            clients.mail,
            sources.mail,
        );

        info!("Back office job queues started");
        Ok(Self {
            sheets,
            calendar,
            mail,
        })
    }

    /// Shut every queue down, dropping pending work.
    ///
    /// All queues are shut down even if one reports an error; the first
    /// error is returned.
    pub async fn shutdown(self) -> Result<(), JobQueueError> {
        let results = [
            self.sheets.into_queue().shutdown().await,
            self.calendar.into_queue().shutdown().await,
            self.mail.into_queue().shutdown().await,
        ];
        results.into_iter().collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use crate::JobQueue;

    /// Wait until nothing is pending or running, advancing the (paused)
    /// clock in small steps.
    pub(crate) async fn wait_idle(queue: &JobQueue) {
        for _ in 0..10_000 {
            let stats = queue.stats();
            if stats.pending == 0 && stats.active == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("queue {} never went idle", queue.name());
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
