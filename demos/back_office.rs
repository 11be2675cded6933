//! Drives the back-office queues against in-memory collaborators.
//!
//! Run with `RUST_LOG=debug` to watch deduplication, eviction and timeouts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use keyed_job_queue::services::{
    Attendee, BackOfficeClients, BackOfficeSources, CalendarApi, CalendarEntry, CalendarSource,
    EventRoster, MailComposer, MailMessage, MailRequest, MailTransport, MemberRecord,
    RosterSource, SheetsApi,
};
use keyed_job_queue::{BackOffice, BoxError, LazyResource, SchedulerConfig};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Stands in for the Google Sheets, Calendar and mail provider clients.
struct ConsoleClient {
    latency: Duration,
}

#[async_trait]
impl SheetsApi for ConsoleClient {
    async fn rewrite_tab(&self, tab: &str, rows: Vec<Vec<String>>) -> Result<(), BoxError> {
        tokio::time::sleep(self.latency).await;
        info!(tab, rows = rows.len(), "Rewrote tab");
        Ok(())
    }
}

#[async_trait]
impl CalendarApi for ConsoleClient {
    async fn upsert_event(&self, entry: &CalendarEntry) -> Result<(), BoxError> {
        tokio::time::sleep(self.latency).await;
        info!(event_id = %entry.event_id, title = %entry.title, "Upserted calendar event");
        Ok(())
    }

    async fn remove_event(&self, event_id: &str) -> Result<(), BoxError> {
        info!(event_id, "Removed calendar event");
        Ok(())
    }
}

#[async_trait]
impl MailTransport for ConsoleClient {
    async fn send(&self, message: &MailMessage) -> Result<(), BoxError> {
        tokio::time::sleep(self.latency).await;
        info!(to = %message.to, subject = %message.subject, "Delivered mail");
        Ok(())
    }
}

#[derive(Default)]
struct Database {
    events: Mutex<HashMap<String, (String, Vec<String>)>>,
}

#[async_trait]
impl RosterSource for Database {
    async fn event_roster(&self, event_id: &str) -> Result<Option<EventRoster>, BoxError> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        Ok(events.get(event_id).map(|(_, names)| EventRoster {
            event_id: event_id.to_string(),
            attendees: names
                .iter()
                .map(|name| Attendee {
                    name: name.clone(),
                    email: format!("{name}@example.org"),
                    ticket_type: "standard".to_string(),
                    checked_in: false,
                })
                .collect(),
        }))
    }

    async fn member_directory(&self) -> Result<Vec<MemberRecord>, BoxError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl CalendarSource for Database {
    async fn calendar_entry(&self, event_id: &str) -> Result<Option<CalendarEntry>, BoxError> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let starts_at = SystemTime::now() + Duration::from_secs(86_400);
        Ok(events.get(event_id).map(|(title, _)| CalendarEntry {
            event_id: event_id.to_string(),
            title: title.clone(),
            location: None,
            starts_at,
            ends_at: starts_at + Duration::from_secs(7_200),
            cancelled: false,
        }))
    }
}

#[async_trait]
impl MailComposer for Database {
    async fn compose(&self, request: &MailRequest) -> Result<Option<MailMessage>, BoxError> {
        Ok(Some(MailMessage {
            to: format!("{}@example.org", request.recipient_id),
            subject: format!("Your {} for {}", request.template, request.reference_id),
            html_body: String::new(),
            text_body: String::new(),
        }))
    }
}

fn console_resource<T: ?Sized + Send + Sync + 'static>(
    name: &'static str,
    cast: fn(Arc<ConsoleClient>) -> Arc<T>,
) -> Arc<LazyResource<T>> {
    Arc::new(LazyResource::new(name, move || async move {
        info!(resource = name, "Authenticating");
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(cast(Arc::new(ConsoleClient {
            latency: Duration::from_millis(150),
        })))
    }))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SchedulerConfig::load(Path::new(&path))?,
        None => SchedulerConfig::default(),
    };

    let database = Arc::new(Database::default());
    database.events.lock().unwrap_or_else(|e| e.into_inner()).insert(
        "42".to_string(),
        ("Spring gala".to_string(), vec!["ada".to_string()]),
    );

    let office = BackOffice::new(
        &config,
        BackOfficeClients {
            sheets: console_resource("sheets", |c| c as Arc<dyn SheetsApi>),
            calendar: console_resource("calendar", |c| c as Arc<dyn CalendarApi>),
            mail: console_resource("mail", |c| c as Arc<dyn MailTransport>),
        },
        BackOfficeSources {
            roster: database.clone(),
            calendar: database.clone(),
            mail: database.clone(),
        },
    )?;

    // Three quick edits to the same event collapse into one rewrite each.
    for _ in 0..3 {
        office.sheets.resync_event("42");
        office.calendar.sync_event("42");
    }
    for member in ["ada", "grace", "linus"] {
        office
            .mail
            .send(MailRequest::new("ticket", member, "event-42"));
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    info!(
        sheets = ?office.sheets.queue().stats(),
        calendar = ?office.calendar.queue().stats(),
        mail = ?office.mail.queue().stats(),
        "Queue stats"
    );

    office.shutdown().await?;
    Ok(())
}
