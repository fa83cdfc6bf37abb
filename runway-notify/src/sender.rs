use async_trait::async_trait;
use reqwest::StatusCode;
use runway_core::pii::Masked;
use serde_json::json;
use std::time::Duration;

/// Why a delivery attempt did not succeed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    /// Worth retrying: timeouts, connection failures, 5xx and 429 responses.
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// Retrying cannot help: rejected payload, bad credentials, unknown recipient.
    #[error("terminal delivery failure: {0}")]
    Terminal(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    fn from_status(status: StatusCode, body: String) -> Self {
        let msg = format!("provider responded {}: {}", status, body);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT {
            DeliveryError::Transient(msg)
        } else {
            DeliveryError::Terminal(msg)
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            DeliveryError::Transient(err.to_string())
        } else {
            DeliveryError::Terminal(err.to_string())
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), DeliveryError>;
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send_push(&self, tokens: &[String], title: &str, body: &str) -> Result<(), DeliveryError>;
}

/// Transactional email over a JSON HTTP API (`POST {endpoint}` with a bearer key).
pub struct HttpEmailSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl HttpEmailSender {
    pub fn new(endpoint: String, api_key: String, from: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, endpoint, api_key, from })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": [to],
                "subject": subject,
                "html": html,
            }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("Email accepted by provider for {}", Masked(to));
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::from_status(status, body))
    }
}

/// OneSignal-compatible push delivery keyed by player ids.
pub struct OneSignalPushSender {
    client: reqwest::Client,
    endpoint: String,
    app_id: String,
    api_key: String,
}

impl OneSignalPushSender {
    pub fn new(endpoint: String, app_id: String, api_key: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, endpoint, app_id, api_key })
    }
}

#[async_trait]
impl PushSender for OneSignalPushSender {
    async fn send_push(&self, tokens: &[String], title: &str, body: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("Basic {}", self.api_key))
            .json(&json!({
                "app_id": self.app_id,
                "include_player_ids": tokens,
                "headings": { "en": title },
                "contents": { "en": body },
            }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::from_status(status, body))
    }
}

/// Sender that only logs. Used when no provider is configured.
#[derive(Debug, Default, Clone)]
pub struct LogSender;

#[async_trait]
impl EmailSender for LogSender {
    async fn send_email(&self, to: &str, subject: &str, _html: &str) -> Result<(), DeliveryError> {
        tracing::info!("[email disabled] would send '{}' to {}", subject, Masked(to));
        Ok(())
    }
}

#[async_trait]
impl PushSender for LogSender {
    async fn send_push(&self, tokens: &[String], title: &str, _body: &str) -> Result<(), DeliveryError> {
        tracing::info!("[push disabled] would send '{}' to {} device(s)", title, tokens.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(DeliveryError::from_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(DeliveryError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(!DeliveryError::from_status(StatusCode::BAD_REQUEST, String::new()).is_transient());
        assert!(!DeliveryError::from_status(StatusCode::UNAUTHORIZED, String::new()).is_transient());
    }
}
