use prometheus::{IntCounterVec, Opts, Registry};

use crate::job::Channel;

pub const DELIVERED: &str = "delivered";
pub const RETRIED: &str = "retried";
pub const FAILED: &str = "failed";
pub const DUPLICATE: &str = "duplicate";

/// Per-channel job outcome counters.
#[derive(Clone)]
pub struct DispatchMetrics {
    jobs: IntCounterVec,
}

impl DispatchMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::unregistered()?;
        registry.register(Box::new(metrics.jobs.clone()))?;
        Ok(metrics)
    }

    /// Counters that are not exported anywhere; handy in tests.
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        let jobs = IntCounterVec::new(
            Opts::new("runway_notification_jobs_total", "Notification jobs by channel and outcome"),
            &["channel", "outcome"],
        )?;
        Ok(Self { jobs })
    }

    pub fn record(&self, channel: Channel, outcome: &str) {
        self.jobs.with_label_values(&[channel.as_str(), outcome]).inc();
    }

    pub fn count(&self, channel: Channel, outcome: &str) -> u64 {
        self.jobs.with_label_values(&[channel.as_str(), outcome]).get()
    }
}
