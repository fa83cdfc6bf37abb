use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::FlightStatus;

/// Topic name that live subscribers listen on.
pub const FLIGHT_STATUS_UPDATED: &str = "flightStatusUpdated";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeEvent {
    pub flight_id: Uuid,
    pub status: FlightStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("event serialization failed: {0}")]
    Serialization(String),
    #[error("event transport failed: {0}")]
    Transport(String),
}

/// Fire-and-forget broadcast of status transitions. No retries, no history.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, event: &StatusChangeEvent) -> Result<(), PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload_shape() {
        let flight_id = Uuid::new_v4();
        let event = StatusChangeEvent { flight_id, status: FlightStatus::Delayed };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["flightId"], flight_id.to_string());
        assert_eq!(value["status"], "DELAYED");
    }
}
