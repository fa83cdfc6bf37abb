use async_trait::async_trait;
use runway_core::pii::Masked;
use std::sync::Arc;

use crate::job::{status_body, status_headline, JobPayload, NotificationJob};
use crate::sender::{DeliveryError, EmailSender, PushSender};

/// Performs one delivery attempt for a claimed job.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &NotificationJob) -> Result<(), DeliveryError>;
}

pub struct EmailProcessor {
    sender: Arc<dyn EmailSender>,
}

impl EmailProcessor {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl JobProcessor for EmailProcessor {
    async fn process(&self, job: &NotificationJob) -> Result<(), DeliveryError> {
        let JobPayload::Email(email) = &job.payload else {
            return Err(DeliveryError::Terminal(format!("job {} is not an email job", job.key)));
        };

        tracing::info!("Processing email for user {} (job {})", email.target_email, job.key);

        let subject = status_headline(&email.flight_number);
        let html = format!("<h1>{}</h1>", status_body(email.new_status));
        match self.sender.send_email(&email.target_email.0, &subject, &html).await {
            Ok(()) => {
                tracing::info!("Successfully sent email for job {}", job.key);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Email failed for {}: {}", Masked(&email.target_email.0), e);
                Err(e)
            }
        }
    }
}

pub struct PushProcessor {
    sender: Arc<dyn PushSender>,
}

impl PushProcessor {
    pub fn new(sender: Arc<dyn PushSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl JobProcessor for PushProcessor {
    async fn process(&self, job: &NotificationJob) -> Result<(), DeliveryError> {
        let JobPayload::Push(push) = &job.payload else {
            return Err(DeliveryError::Terminal(format!("job {} is not a push job", job.key)));
        };

        if push.target_tokens.is_empty() {
            tracing::info!("No devices on job {}. Skipping notification.", job.key);
            return Ok(());
        }

        self.sender
            .send_push(&push.target_tokens, &push.title_text, &push.body_text)
            .await
            .inspect_err(|e| tracing::warn!("Push failed for flight {}: {}", job.flight_id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{EmailJob, PushJob};
    use runway_core::FlightStatus;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingSender {
        emails: Mutex<Vec<(String, String, String)>>,
        pushes: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), DeliveryError> {
            self.emails.lock().unwrap().push((to.into(), subject.into(), html.into()));
            Ok(())
        }
    }

    #[async_trait]
    impl PushSender for RecordingSender {
        async fn send_push(&self, tokens: &[String], _title: &str, _body: &str) -> Result<(), DeliveryError> {
            self.pushes.lock().unwrap().push(tokens.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_email_processor_renders_status() {
        let sender = Arc::new(RecordingSender::default());
        let processor = EmailProcessor::new(sender.clone());
        let job = NotificationJob::email(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1,
            EmailJob {
                target_email: Masked("a@example.com".into()),
                flight_number: "RW9".into(),
                new_status: FlightStatus::Delayed,
            },
        );

        processor.process(&job).await.unwrap();

        let sent = sender.emails.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "a@example.com");
        assert_eq!(sent[0].1, "Flight number RW9 has been Status Updated");
        assert_eq!(sent[0].2, "<h1>The flight status is now: DELAYED</h1>");
    }

    #[tokio::test]
    async fn test_push_processor_skips_empty_audience() {
        let sender = Arc::new(RecordingSender::default());
        let processor = PushProcessor::new(sender.clone());
        let job = NotificationJob::push(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1,
            PushJob::status_update(vec![], "RW9", FlightStatus::Delayed),
        );

        processor.process(&job).await.unwrap();
        assert!(sender.pushes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_payload_is_terminal() {
        let processor = PushProcessor::new(Arc::new(RecordingSender::default()));
        let job = NotificationJob::email(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1,
            EmailJob {
                target_email: Masked("a@example.com".into()),
                flight_number: "RW9".into(),
                new_status: FlightStatus::OnTime,
            },
        );
        let err = processor.process(&job).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
