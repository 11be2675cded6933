//! Spreadsheet sync: event rosters and the member directory.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{BoxError, EnqueueOutcome, Job, JobContext, JobQueue, LazyResource};

const ROSTER_HEADER: [&str; 4] = ["Name", "Email", "Ticket", "Checked in"];
const MEMBER_HEADER: [&str; 3] = ["Name", "Email", "Status"];
const MEMBERS_TAB: &str = "members";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attendee {
    pub name: String,
    pub email: String,
    pub ticket_type: String,
    pub checked_in: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRoster {
    pub event_id: String,
    pub attendees: Vec<Attendee>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord {
    pub name: String,
    pub email: String,
    pub status: String,
}

/// Authenticated spreadsheet client.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Replace every row of `tab` with `rows`.
    async fn rewrite_tab(&self, tab: &str, rows: Vec<Vec<String>>) -> Result<(), BoxError>;
}

/// Current state of what the spreadsheet mirrors.
#[async_trait]
pub trait RosterSource: Send + Sync {
    /// `None` when the event no longer exists.
    async fn event_roster(&self, event_id: &str) -> Result<Option<EventRoster>, BoxError>;

    async fn member_directory(&self) -> Result<Vec<MemberRecord>, BoxError>;
}

/// Tab an event's roster is written to.
pub fn event_tab(event_id: &str) -> String {
    format!("event-{event_id}")
}

fn header(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

fn roster_rows(roster: &EventRoster) -> Vec<Vec<String>> {
    std::iter::once(header(&ROSTER_HEADER))
        .chain(roster.attendees.iter().map(|a| {
            vec![
                a.name.clone(),
                a.email.clone(),
                a.ticket_type.clone(),
                if a.checked_in { "yes" } else { "no" }.to_string(),
            ]
        }))
        .collect()
}

fn member_rows(members: &[MemberRecord]) -> Vec<Vec<String>> {
    std::iter::once(header(&MEMBER_HEADER))
        .chain(
            members
                .iter()
                .map(|m| vec![m.name.clone(), m.email.clone(), m.status.clone()]),
        )
        .collect()
}

struct RefreshEventTab {
    event_id: String,
    client: Arc<LazyResource<dyn SheetsApi>>,
    source: Arc<dyn RosterSource>,
}

impl Job for RefreshEventTab {
    fn key(&self) -> String {
        format!("sheets:event:{}", self.event_id)
    }

    async fn execute(self, _ctx: JobContext) -> Result<(), BoxError> {
        let rows = match self.source.event_roster(&self.event_id).await? {
            Some(roster) => roster_rows(&roster),
            None => {
                debug!(event_id = %self.event_id, "Event gone, clearing its tab");
                Vec::new()
            }
        };

        let sheets = self.client.get().await?;
        sheets.rewrite_tab(&event_tab(&self.event_id), rows).await
    }
}

struct RefreshMemberTab {
    client: Arc<LazyResource<dyn SheetsApi>>,
    source: Arc<dyn RosterSource>,
}

impl Job for RefreshMemberTab {
    fn key(&self) -> String {
        "sheets:members".to_string()
    }

    async fn execute(self, _ctx: JobContext) -> Result<(), BoxError> {
        let members = self.source.member_directory().await?;
        let sheets = self.client.get().await?;
        sheets.rewrite_tab(MEMBERS_TAB, member_rows(&members)).await
    }
}

/// Mirrors rosters and the member list into the shared spreadsheet.
pub struct SheetSync {
    queue: JobQueue,
    client: Arc<LazyResource<dyn SheetsApi>>,
    source: Arc<dyn RosterSource>,
}

impl SheetSync {
    pub fn new(
        queue: JobQueue,
        client: Arc<LazyResource<dyn SheetsApi>>,
        source: Arc<dyn RosterSource>,
    ) -> Self {
        Self {
            queue,
            client,
            source,
        }
    }

    /// Schedule a rewrite of the event's tab from its current roster.
    pub fn resync_event(&self, event_id: &str) -> EnqueueOutcome {
        self.queue.enqueue_job(RefreshEventTab {
            event_id: event_id.to_string(),
            client: Arc::clone(&self.client),
            source: Arc::clone(&self.source),
        })
    }

    /// Schedule a rewrite of the member directory tab.
    pub fn resync_members(&self) -> EnqueueOutcome {
        self.queue.enqueue_job(RefreshMemberTab {
            client: Arc::clone(&self.client),
            source: Arc::clone(&self.source),
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
