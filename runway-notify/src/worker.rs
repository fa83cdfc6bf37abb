use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::job::{Channel, JobKey, NotificationJob};
use crate::metrics::{self, DispatchMetrics};
use crate::processor::JobProcessor;
use crate::queue::JobQueue;
use crate::retry::RetryPolicy;
use crate::sender::DeliveryError;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// How long an idle worker blocks on the queue before re-checking shutdown.
    pub poll_interval: Duration,
    /// How often expired claims are returned to the ready list.
    pub reap_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(1),
            reap_interval: Duration::from_secs(15),
        }
    }
}

/// A job that exhausted its attempts or failed terminally.
#[derive(Debug, Clone)]
pub struct FailedJob {
    pub key: JobKey,
    pub channel: Channel,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Delivered,
    /// Already delivered under the same key; completed without sending.
    Duplicate,
    Retrying { delay: Duration },
    Failed,
}

/// Consumes one channel's queue with a fixed number of concurrent workers.
pub struct Dispatcher {
    channel: Channel,
    queue: Arc<dyn JobQueue>,
    processor: Arc<dyn JobProcessor>,
    config: DispatchConfig,
    metrics: DispatchMetrics,
    failures: broadcast::Sender<FailedJob>,
}

impl Dispatcher {
    pub fn new(
        channel: Channel,
        queue: Arc<dyn JobQueue>,
        processor: Arc<dyn JobProcessor>,
        config: DispatchConfig,
        metrics: DispatchMetrics,
    ) -> Self {
        let (failures, _) = broadcast::channel(64);
        Self { channel, queue, processor, config, metrics, failures }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Stream of terminal failures, for operators and tests.
    pub fn failures(&self) -> broadcast::Receiver<FailedJob> {
        self.failures.subscribe()
    }

    /// Spawn the worker tasks plus one reaper that requeues claims whose
    /// lease expired. Claims held by live workers, in this process or
    /// another, are untouched. Every task exits once `shutdown` flips to
    /// `true`.
    pub async fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!("Starting {} {} worker(s)", self.config.concurrency, self.channel);
        let mut handles: Vec<JoinHandle<()>> = (0..self.config.concurrency)
            .map(|worker_id| {
                let dispatcher = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { dispatcher.run_worker(worker_id, shutdown).await })
            })
            .collect();

        let dispatcher = self.clone();
        handles.push(tokio::spawn(async move { dispatcher.run_reaper(shutdown).await }));
        handles
    }

    async fn run_reaper(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.reap_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            match self.queue.requeue_expired().await {
                Ok(0) => {}
                Ok(n) => warn!("Requeued {} {} job(s) with expired leases", n, self.channel),
                Err(e) => error!("Failed to requeue expired {} jobs: {}", self.channel, e),
            }
        }
    }

    async fn run_worker(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let claimed = tokio::select! {
                _ = shutdown.changed() => break,
                claimed = self.queue.claim(self.config.poll_interval) => claimed,
            };
            match claimed {
                Ok(Some(job)) => {
                    self.handle(job).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("{} worker {} failed to claim a job: {}", self.channel, worker_id, e);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
        info!("{} worker {} stopped", self.channel, worker_id);
    }

    /// Run one delivery attempt for a claimed job and settle it in the queue.
    pub async fn handle(&self, mut job: NotificationJob) -> JobOutcome {
        match self.queue.is_delivered(&job.key).await {
            Ok(true) => {
                info!("Job {} already delivered, skipping", job.key);
                self.settle_complete(&job).await;
                self.metrics.record(self.channel, metrics::DUPLICATE);
                return JobOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => warn!("Could not check delivery marker for {}: {}", job.key, e),
        }

        job.attempts += 1;
        match self.processor.process(&job).await {
            Ok(()) => {
                self.settle_complete(&job).await;
                self.metrics.record(self.channel, metrics::DELIVERED);
                JobOutcome::Delivered
            }
            Err(DeliveryError::Transient(reason)) if self.config.retry.allows_retry(job.attempts) => {
                let delay = self.config.retry.delay_after(job.attempts);
                warn!(
                    "Job {} attempt {}/{} failed, retrying in {:?}: {}",
                    job.key, job.attempts, self.config.retry.max_attempts, delay, reason
                );
                if let Err(e) = self.queue.schedule_retry(&job, delay).await {
                    error!("Failed to reschedule job {}: {}", job.key, e);
                }
                self.metrics.record(self.channel, metrics::RETRIED);
                JobOutcome::Retrying { delay }
            }
            Err(e) => {
                self.fail(&job, e).await;
                JobOutcome::Failed
            }
        }
    }

    async fn settle_complete(&self, job: &NotificationJob) {
        if let Err(e) = self.queue.complete(job).await {
            error!("Failed to mark job {} complete: {}", job.key, e);
        }
    }

    async fn fail(&self, job: &NotificationJob, err: DeliveryError) {
        error!(
            "Job {} on {} dropped after {} attempt(s): {}",
            job.key, self.channel, job.attempts, err
        );
        if let Err(e) = self.queue.discard(job).await {
            error!("Failed to discard job {}: {}", job.key, e);
        }
        self.metrics.record(self.channel, metrics::FAILED);
        let _ = self.failures.send(FailedJob {
            key: job.key.clone(),
            channel: self.channel,
            attempts: job.attempts,
            error: err.to_string(),
            failed_at: Utc::now(),
        });
    }
}
