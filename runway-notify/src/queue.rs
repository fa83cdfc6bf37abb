use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::job::{JobKey, NotificationJob};

/// How long a claim stays with its worker. Must comfortably exceed one
/// delivery attempt, including the provider's HTTP timeout.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(60);

/// How long enqueue and delivery markers are remembered.
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(String),
    #[error("job encoding failed: {0}")]
    Encoding(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with the same key was already accepted; nothing was added.
    Duplicate,
}

/// A work queue for one delivery channel, possibly shared by several
/// processes.
///
/// A claim is a lease: the job belongs to the claiming worker until it is
/// completed, rescheduled or discarded, or until the lease runs out.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: NotificationJob) -> Result<EnqueueOutcome, QueueError>;

    /// Wait up to `wait` for a ready job and claim it.
    async fn claim(&self, wait: Duration) -> Result<Option<NotificationJob>, QueueError>;

    /// Whether a job with this key has already been delivered.
    async fn is_delivered(&self, key: &JobKey) -> Result<bool, QueueError>;

    /// Remove a claimed job after successful delivery.
    async fn complete(&self, job: &NotificationJob) -> Result<(), QueueError>;

    /// Put a claimed job back, ready again after `delay`.
    async fn schedule_retry(&self, job: &NotificationJob, delay: Duration) -> Result<(), QueueError>;

    /// Remove a claimed job that will not be attempted again.
    async fn discard(&self, job: &NotificationJob) -> Result<(), QueueError>;

    /// Return claimed jobs whose lease ran out to the ready list. Claims
    /// with a live lease are left alone.
    async fn requeue_expired(&self) -> Result<usize, QueueError>;
}

struct Lease {
    expires_at: Instant,
    job: NotificationJob,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<NotificationJob>,
    delayed: Vec<(Instant, NotificationJob)>,
    processing: HashMap<JobKey, Lease>,
    /// Marker expiry by key.
    seen: HashMap<JobKey, Instant>,
    delivered: HashMap<JobKey, Instant>,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].0 <= now {
                let (_, job) = self.delayed.swap_remove(i);
                self.ready.push_back(job);
            } else {
                i += 1;
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(due, _)| *due).min()
    }

    fn prune_markers(&mut self, now: Instant) {
        self.seen.retain(|_, expires_at| *expires_at > now);
        self.delivered.retain(|_, expires_at| *expires_at > now);
    }
}

/// Process-local queue used by tests and single-node development setups.
/// Markers expire like their Redis counterparts.
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    lease: Duration,
    marker_ttl: Duration,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::with_settings(DEFAULT_LEASE, DEFAULT_IDEMPOTENCY_TTL)
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(lease: Duration, marker_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            lease,
            marker_ttl,
        }
    }

    /// Jobs waiting to run, ready ones first.
    pub async fn pending(&self) -> Vec<NotificationJob> {
        let state = self.state.lock().await;
        state
            .ready
            .iter()
            .cloned()
            .chain(state.delayed.iter().map(|(_, job)| job.clone()))
            .collect()
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.processing.len()
    }

    pub async fn is_empty(&self) -> bool {
        let state = self.state.lock().await;
        state.ready.is_empty() && state.delayed.is_empty() && state.processing.is_empty()
    }

    /// Enqueue and delivery markers currently remembered.
    pub async fn marker_count(&self) -> usize {
        let state = self.state.lock().await;
        state.seen.len() + state.delivered.len()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: NotificationJob) -> Result<EnqueueOutcome, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.prune_markers(now);
        if state.seen.contains_key(&job.key) {
            return Ok(EnqueueOutcome::Duplicate);
        }
        state.seen.insert(job.key.clone(), now + self.marker_ttl);
        state.ready.push_back(job);
        drop(state);
        self.notify.notify_one();
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn claim(&self, wait: Duration) -> Result<Option<NotificationJob>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let next_due = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.promote_due(now);
                if let Some(job) = state.ready.pop_front() {
                    let lease = Lease { expires_at: now + self.lease, job: job.clone() };
                    state.processing.insert(job.key.clone(), lease);
                    return Ok(Some(job));
                }
                state.next_due()
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn is_delivered(&self, key: &JobKey) -> Result<bool, QueueError> {
        let state = self.state.lock().await;
        Ok(state.delivered.get(key).is_some_and(|expires_at| *expires_at > Instant::now()))
    }

    async fn complete(&self, job: &NotificationJob) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.processing.remove(&job.key);
        state.prune_markers(now);
        state.delivered.insert(job.key.clone(), now + self.marker_ttl);
        Ok(())
    }

    async fn schedule_retry(&self, job: &NotificationJob, delay: Duration) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.processing.remove(&job.key);
        state.delayed.push((Instant::now() + delay, job.clone()));
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn discard(&self, job: &NotificationJob) -> Result<(), QueueError> {
        self.state.lock().await.processing.remove(&job.key);
        Ok(())
    }

    async fn requeue_expired(&self) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let expired: Vec<JobKey> = state
            .processing
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            if let Some(lease) = state.processing.remove(key) {
                state.ready.push_front(lease.job);
            }
        }
        drop(state);
        if !expired.is_empty() {
            self.notify.notify_waiters();
        }
        Ok(expired.len())
    }
}
