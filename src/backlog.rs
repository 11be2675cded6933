//! Bounded, deduplicating backlog shared by a queue's workers.

use std::collections::{HashSet, VecDeque};

use crate::job::PendingJob;

/// Result of offering a job to the queue.
///
/// Returned by [`JobQueue::enqueue`](crate::JobQueue::enqueue) for
/// observability only; it is not a completion handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The job was appended to the backlog.
    Admitted,
    /// The job was appended after evicting the oldest pending job.
    AdmittedWithEviction { evicted_key: String },
    /// A job with the same key is already pending or running; this one was dropped.
    Duplicate,
    /// The queue has shut down and no longer accepts work.
    Closed,
}

impl EnqueueOutcome {
    /// Whether the offered job will eventually be run.
    pub fn is_admitted(&self) -> bool {
        matches!(
            self,
            EnqueueOutcome::Admitted | EnqueueOutcome::AdmittedWithEviction { .. }
        )
    }
}

/// Scheduler bookkeeping for one queue.
///
/// Every method is synchronous; callers hold the queue's lock around them and
/// never across an `.await`.
#[derive(Debug)]
pub(crate) struct Backlog {
    pending: VecDeque<PendingJob>,
    /// Keys that are pending or running.
    active_keys: HashSet<String>,
    /// Jobs currently executing.
    active_count: usize,
    max_len: usize,
    closed: bool,
}

impl Backlog {
    pub(crate) fn new(max_len: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_len),
            active_keys: HashSet::new(),
            active_count: 0,
            max_len,
            closed: false,
        }
    }

    /// Offer a job, applying deduplication and drop-oldest eviction.
    pub(crate) fn admit(&mut self, job: PendingJob) -> EnqueueOutcome {
        if self.closed {
            return EnqueueOutcome::Closed;
        }

        if self.active_keys.contains(&job.key) {
            return EnqueueOutcome::Duplicate;
        }

        let mut outcome = EnqueueOutcome::Admitted;
        if self.pending.len() >= self.max_len {
            if let Some(evicted) = self.pending.pop_front() {
                self.active_keys.remove(&evicted.key);
                outcome = EnqueueOutcome::AdmittedWithEviction {
                    evicted_key: evicted.key,
                };
            }
        }

        self.active_keys.insert(job.key.clone());
        self.pending.push_back(job);
        outcome
    }

    /// Claim the oldest pending job for a worker, counting it as active.
    pub(crate) fn claim(&mut self) -> Option<PendingJob> {
        let job = self.pending.pop_front()?;
        self.active_count += 1;
        Some(job)
    }

    /// Release a finished job's slot and key.
    pub(crate) fn finish(&mut self, key: &str) {
        self.active_count = self.active_count.saturating_sub(1);
        self.active_keys.remove(key);
    }

    /// Stop admitting and hand back everything that never started.
    pub(crate) fn close(&mut self) -> Vec<PendingJob> {
        self.closed = true;
        let dropped: Vec<PendingJob> = self.pending.drain(..).collect();
        for job in &dropped {
            self.active_keys.remove(&job.key);
        }
        dropped
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active_count
    }

    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.active_keys.contains(key)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    #[cfg(test)]
    fn pending_keys(&self) -> Vec<&str> {
        self.pending.iter().map(|job| job.key.as_str()).collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::boxed_action;

    fn job(key: &str) -> PendingJob {
        PendingJob {
            key: key.to_string(),
            action: boxed_action(|_ctx| async { Ok(()) }),
        }
    }

    #[test]
    fn admit_appends_in_fifo_order() {
        let mut backlog = Backlog::new(10);
        assert_eq!(backlog.admit(job("a")), EnqueueOutcome::Admitted);
        assert_eq!(backlog.admit(job("b")), EnqueueOutcome::Admitted);
        assert_eq!(backlog.admit(job("c")), EnqueueOutcome::Admitted);

        assert_eq!(backlog.pending_keys(), vec!["a", "b", "c"]);
        assert_eq!(backlog.claim().map(|j| j.key), Some("a".to_string()));
        assert_eq!(backlog.claim().map(|j| j.key), Some("b".to_string()));
        assert_eq!(backlog.claim().map(|j| j.key), Some("c".to_string()));
        assert!(backlog.claim().is_none());
    }

    #[test]
    fn duplicate_key_is_rejected_while_pending() {
        let mut backlog = Backlog::new(10);
        backlog.admit(job("a"));

        assert_eq!(backlog.admit(job("a")), EnqueueOutcome::Duplicate);
        assert_eq!(backlog.pending_len(), 1);
    }

    #[test]
    fn duplicate_key_is_rejected_while_running() {
        let mut backlog = Backlog::new(10);
        backlog.admit(job("a"));
        let running = backlog.claim().unwrap();

        assert_eq!(backlog.admit(job("a")), EnqueueOutcome::Duplicate);
        assert_eq!(backlog.pending_len(), 0);

        backlog.finish(&running.key);
        assert_eq!(backlog.admit(job("a")), EnqueueOutcome::Admitted);
    }

    #[test]
    fn full_backlog_evicts_oldest_first() {
        let mut backlog = Backlog::new(2);
        assert!(backlog.admit(job("a")).is_admitted());
        assert!(backlog.admit(job("b")).is_admitted());

        assert_eq!(
            backlog.admit(job("c")),
            EnqueueOutcome::AdmittedWithEviction {
                evicted_key: "a".to_string()
            }
        );
        assert_eq!(
            backlog.admit(job("d")),
            EnqueueOutcome::AdmittedWithEviction {
                evicted_key: "b".to_string()
            }
        );

        assert_eq!(backlog.pending_keys(), vec!["c", "d"]);
        assert!(!backlog.contains_key("a"));
        assert!(!backlog.contains_key("b"));
    }

    #[test]
    fn overflow_by_k_evicts_the_k_oldest() {
        let max_len = 5;
        let extra = 3;
        let mut backlog = Backlog::new(max_len);
        let mut evicted = Vec::new();

        for i in 0..max_len + extra {
            if let EnqueueOutcome::AdmittedWithEviction { evicted_key } =
                backlog.admit(job(&format!("job-{i}")))
            {
                evicted.push(evicted_key);
            }
        }

        assert_eq!(backlog.pending_len(), max_len);
        assert_eq!(evicted, vec!["job-0", "job-1", "job-2"]);
        assert_eq!(
            backlog.pending_keys(),
            vec!["job-3", "job-4", "job-5", "job-6", "job-7"]
        );
    }

    #[test]
    fn evicted_key_can_be_admitted_again() {
        let mut backlog = Backlog::new(1);
        backlog.admit(job("a"));
        backlog.admit(job("b"));

        assert_eq!(
            backlog.admit(job("a")),
            EnqueueOutcome::AdmittedWithEviction {
                evicted_key: "b".to_string()
            }
        );
    }

    #[test]
    fn claim_and_finish_track_active_count() {
        let mut backlog = Backlog::new(10);
        backlog.admit(job("a"));
        backlog.admit(job("b"));

        let a = backlog.claim().unwrap();
        let b = backlog.claim().unwrap();
        assert_eq!(backlog.active_count(), 2);
        assert!(backlog.contains_key("a"));

        backlog.finish(&a.key);
        assert_eq!(backlog.active_count(), 1);
        assert!(!backlog.contains_key("a"));

        backlog.finish(&b.key);
        assert_eq!(backlog.active_count(), 0);
    }

    #[test]
    fn close_drops_pending_and_refuses_new_work() {
        let mut backlog = Backlog::new(10);
        backlog.admit(job("a"));
        backlog.admit(job("b"));

        let dropped = backlog.close();
        assert_eq!(dropped.len(), 2);
        assert_eq!(backlog.pending_len(), 0);
        assert!(!backlog.contains_key("a"));
        assert!(backlog.is_closed());
        assert_eq!(backlog.admit(job("c")), EnqueueOutcome::Closed);
    }
}
