use chrono::{DateTime, Utc};
use runway_core::pii::Masked;
use runway_core::FlightStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Delivery channel. Each channel has its own queue and worker pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic idempotency key: `flight-{flight}-{channel}-{target}-{dispatch}`.
///
/// `dispatch` is the version of the status change that produced the job, so a
/// later status change for the same flight and target yields a different key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct JobKey(String);

impl JobKey {
    pub fn new(flight_id: Uuid, channel: Channel, target_id: &str, dispatch_version: i64) -> Self {
        JobKey(format!("flight-{}-{}-{}-{}", flight_id, channel, target_id, dispatch_version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailJob {
    pub target_email: Masked<String>,
    pub flight_number: String,
    pub new_status: FlightStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushJob {
    pub target_tokens: Vec<String>,
    pub title_text: String,
    pub body_text: String,
}

impl PushJob {
    pub fn status_update(tokens: Vec<String>, flight_number: &str, status: FlightStatus) -> Self {
        Self {
            target_tokens: tokens,
            title_text: status_headline(flight_number),
            body_text: status_body(status),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Email(EmailJob),
    Push(PushJob),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationJob {
    pub key: JobKey,
    pub flight_id: Uuid,
    pub payload: JobPayload,
    /// Delivery attempts made so far.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl NotificationJob {
    pub fn email(flight_id: Uuid, user_id: Uuid, dispatch_version: i64, job: EmailJob) -> Self {
        Self::build(JobKey::new(flight_id, Channel::Email, &user_id.to_string(), dispatch_version), flight_id, JobPayload::Email(job))
    }

    pub fn push(flight_id: Uuid, device_id: Uuid, dispatch_version: i64, job: PushJob) -> Self {
        Self::build(JobKey::new(flight_id, Channel::Push, &device_id.to_string(), dispatch_version), flight_id, JobPayload::Push(job))
    }

    fn build(key: JobKey, flight_id: Uuid, payload: JobPayload) -> Self {
        Self {
            key,
            flight_id,
            payload,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn channel(&self) -> Channel {
        match self.payload {
            JobPayload::Email(_) => Channel::Email,
            JobPayload::Push(_) => Channel::Push,
        }
    }
}

pub fn status_headline(flight_number: &str) -> String {
    format!("Flight number {} has been Status Updated", flight_number)
}

pub fn status_body(status: FlightStatus) -> String {
    format!("The flight status is now: {}", status)
}
