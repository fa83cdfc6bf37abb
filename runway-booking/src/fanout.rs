use runway_core::events::{StatusChangeEvent, StatusPublisher};
use runway_core::models::Flight;
use runway_notify::job::{EmailJob, NotificationJob, PushJob};
use runway_notify::queue::{EnqueueOutcome, JobQueue};
use std::sync::Arc;

use crate::audience::AudienceResolver;

/// What one fanout cycle managed to hand off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub email_jobs: usize,
    pub push_jobs: usize,
    pub duplicates: usize,
    pub enqueue_failures: usize,
    pub published: bool,
}

/// Turns one confirmed status transition into queued notifications and a
/// realtime event. Runs after the status commit; nothing here can undo it.
pub struct StatusFanout {
    resolver: AudienceResolver,
    email_queue: Arc<dyn JobQueue>,
    push_queue: Arc<dyn JobQueue>,
    publisher: Arc<dyn StatusPublisher>,
}

impl StatusFanout {
    pub fn new(
        resolver: AudienceResolver,
        email_queue: Arc<dyn JobQueue>,
        push_queue: Arc<dyn JobQueue>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        Self { resolver, email_queue, push_queue, publisher }
    }

    /// `flight.status_version` identifies this status change and is part of
    /// every job key, so dispatching the same change twice adds nothing.
    pub async fn dispatch(&self, flight: &Flight) -> FanoutReport {
        let mut report = FanoutReport::default();
        let dispatch_version = flight.status_version;

        match self.resolver.resolve(flight.id).await {
            Ok(audience) => {
                tracing::info!(
                    flight_id = %flight.id,
                    "Flight status changed to {}: notifying {} email(s), {} device(s)",
                    flight.status,
                    audience.emails.len(),
                    audience.devices.len()
                );

                for target in audience.emails {
                    let job = NotificationJob::email(
                        flight.id,
                        target.user_id,
                        dispatch_version,
                        EmailJob {
                            target_email: target.email,
                            flight_number: flight.flight_number.clone(),
                            new_status: flight.status,
                        },
                    );
                    if self.enqueue(&*self.email_queue, job, &mut report).await {
                        report.email_jobs += 1;
                    }
                }

                for target in audience.devices {
                    let job = NotificationJob::push(
                        flight.id,
                        target.device_id,
                        dispatch_version,
                        PushJob::status_update(vec![target.token], &flight.flight_number, flight.status),
                    );
                    if self.enqueue(&*self.push_queue, job, &mut report).await {
                        report.push_jobs += 1;
                    }
                }
            }
            Err(e) => {
                tracing::error!(flight_id = %flight.id, "Could not resolve notification audience: {}", e);
            }
        }

        let event = StatusChangeEvent { flight_id: flight.id, status: flight.status };
        match self.publisher.publish(&event).await {
            Ok(()) => report.published = true,
            Err(e) => tracing::warn!(flight_id = %flight.id, "Realtime status publish failed: {}", e),
        }

        report
    }

    /// Returns whether a new job was added.
    async fn enqueue(&self, queue: &dyn JobQueue, job: NotificationJob, report: &mut FanoutReport) -> bool {
        let key = job.key.clone();
        match queue.enqueue(job).await {
            Ok(EnqueueOutcome::Enqueued) => true,
            Ok(EnqueueOutcome::Duplicate) => {
                tracing::debug!("Job {} already queued", key);
                report.duplicates += 1;
                false
            }
            Err(e) => {
                tracing::error!("Failed to enqueue job {}: {}", key, e);
                report.enqueue_failures += 1;
                false
            }
        }
    }
}
