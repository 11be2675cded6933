//! Transactional mail.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{BoxError, EnqueueOutcome, Job, JobContext, JobQueue, LazyResource};

/// What should be mailed, to whom, about what.
///
/// The message itself is rendered when the job runs so it reflects the
/// current state of the referenced record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailRequest {
    /// Template name, e.g. `"ticket-confirmation"`.
    pub template: String,
    pub recipient_id: String,
    /// Record the mail is about (order, event, membership...).
    pub reference_id: String,
}

impl MailRequest {
    pub fn new(
        template: impl Into<String>,
        recipient_id: impl Into<String>,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            template: template.into(),
            recipient_id: recipient_id.into(),
            reference_id: reference_id.into(),
        }
    }

    pub fn dedup_key(&self) -> String {
        format!(
            "mail:{}:{}:{}",
            self.template, self.recipient_id, self.reference_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

/// Authenticated connection to the mail provider.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), BoxError>;
}

/// Renders requests into messages.
#[async_trait]
pub trait MailComposer: Send + Sync {
    /// `None` when the mail is no longer relevant (recipient gone, order
    /// refunded...), in which case nothing is sent.
    async fn compose(&self, request: &MailRequest) -> Result<Option<MailMessage>, BoxError>;
}

struct SendMail {
    request: MailRequest,
    transport: Arc<LazyResource<dyn MailTransport>>,
    composer: Arc<dyn MailComposer>,
}

impl Job for SendMail {
    fn key(&self) -> String {
        self.request.dedup_key()
    }

    async fn execute(self, _ctx: JobContext) -> Result<(), BoxError> {
        let Some(message) = self.composer.compose(&self.request).await? else {
            debug!(template = %self.request.template, "Mail no longer relevant, skipped");
            return Ok(());
        };

        let transport = self.transport.get().await?;
        transport.send(&message).await?;
        info!(
            template = %self.request.template,
            reference_id = %self.request.reference_id,
            "Mail sent"
        );
        Ok(())
    }
}

/// Sends transactional mail in the background.
pub struct Mailer {
    queue: JobQueue,
    transport: Arc<LazyResource<dyn MailTransport>>,
    composer: Arc<dyn MailComposer>,
}

impl Mailer {
    pub fn new(
        queue: JobQueue,
        transport: Arc<LazyResource<dyn MailTransport>>,
        composer: Arc<dyn MailComposer>,
    ) -> Self {
        Self {
            queue,
            transport,
            composer,
        }
    }

    /// Schedule a mail. A request identical to one already queued or being
    /// sent is dropped.
    pub fn send(&self, request: MailRequest) -> EnqueueOutcome {
        self.queue.enqueue_job(SendMail {
            request,
            transport: Arc::clone(&self.transport),
            composer: Arc::clone(&self.composer),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobQueueConfig;
    use crate::services::testing::wait_idle;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<MailMessage>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MailTransport for FakeTransport {
        async fn send(&self, message: &MailMessage) -> Result<(), BoxError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    /// Composes for every recipient except `"gone"`.
    struct Templates;

    #[async_trait]
    impl MailComposer for Templates {
        async fn compose(&self, request: &MailRequest) -> Result<Option<MailMessage>, BoxError> {
            if request.recipient_id == "gone" {
                return Ok(None);
            }
            Ok(Some(MailMessage {
                to: format!("{}@example.org", request.recipient_id),
                subject: format!("{} #{}", request.template, request.reference_id),
                html_body: String::new(),
                text_body: String::new(),
            }))
        }
    }

    fn mailer(transport: Arc<FakeTransport>) -> Mailer {
        let transport: Arc<dyn MailTransport> = transport;
        let queue = JobQueue::new("mail", JobQueueConfig::mail()).unwrap();
        Mailer::new(
            queue,
            Arc::new(LazyResource::from_value("mail-transport", transport)),
            Arc::new(Templates),
        )
    }

    #[test]
    fn dedup_key_identifies_template_recipient_and_reference() {
        let request = MailRequest::new("ticket-confirmation", "u1", "order-9");
        assert_eq!(request.dedup_key(), "mail:ticket-confirmation:u1:order-9");
    }

    #[tokio::test(start_paused = true)]
    async fn sends_rendered_message() {
        let transport = Arc::new(FakeTransport::default());
        let mailer = mailer(transport.clone());

        mailer.send(MailRequest::new("ticket-confirmation", "ada", "order-1"));
        wait_idle(mailer.queue()).await;

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ada@example.org");
        assert_eq!(sent[0].subject, "ticket-confirmation #order-1");
    }

    #[tokio::test(start_paused = true)]
    async fn irrelevant_mail_is_skipped() {
        let transport = Arc::new(FakeTransport::default());
        let mailer = mailer(transport.clone());

        assert!(mailer.send(MailRequest::new("welcome", "gone", "m-1")).is_admitted());
        wait_idle(mailer.queue()).await;

        assert!(transport.sent.lock().unwrap().is_empty());
        assert_eq!(mailer.queue().stats().succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_requests_send_once() {
        let transport = Arc::new(FakeTransport::default());
        let mailer = mailer(transport.clone());
        let request = MailRequest::new("receipt", "ada", "order-2");

        assert!(mailer.send(request.clone()).is_admitted());
        assert_eq!(mailer.send(request), EnqueueOutcome::Duplicate);
        wait_idle(mailer.queue()).await;

        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_two_at_a_time() {
        let transport = Arc::new(FakeTransport::default());
        let mailer = mailer(transport.clone());

        for i in 0..6 {
            mailer.send(MailRequest::new("newsletter", format!("member-{i}"), "issue-3"));
        }
        wait_idle(mailer.queue()).await;

        assert_eq!(transport.sent.lock().unwrap().len(), 6);
        assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
    }
}
