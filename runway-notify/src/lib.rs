pub mod job;
pub mod retry;
pub mod queue;
pub mod sender;
pub mod processor;
pub mod worker;
pub mod metrics;
pub mod realtime;

pub use job::{Channel, EmailJob, JobKey, JobPayload, NotificationJob, PushJob};
pub use retry::RetryPolicy;
pub use queue::{EnqueueOutcome, InMemoryJobQueue, JobQueue, QueueError};
pub use sender::{DeliveryError, EmailSender, PushSender};
pub use processor::{EmailProcessor, JobProcessor, PushProcessor};
pub use worker::{DispatchConfig, Dispatcher, FailedJob, JobOutcome};
pub use metrics::DispatchMetrics;
pub use realtime::StatusHub;
