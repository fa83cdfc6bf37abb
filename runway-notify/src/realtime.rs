use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use runway_core::events::{PublishError, StatusChangeEvent, StatusPublisher};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// In-process fanout of status events to live subscribers.
///
/// Best effort: a subscriber only sees events published after it subscribed,
/// and a subscriber that falls behind skips what it missed.
#[derive(Clone)]
pub struct StatusHub {
    tx: broadcast::Sender<StatusChangeEvent>,
}

impl StatusHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Events for one flight only.
    pub fn subscribe(&self, flight_id: Uuid) -> impl Stream<Item = StatusChangeEvent> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(move |result| async move {
            match result {
                Ok(event) if event.flight_id == flight_id => Some(event),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!("Status subscriber for flight {} lagged, skipped {} event(s)", flight_id, skipped);
                    None
                }
            }
        })
    }

    /// Hand an event to current subscribers. Returns how many received it.
    pub fn forward(&self, event: StatusChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl StatusPublisher for StatusHub {
    async fn publish(&self, event: &StatusChangeEvent) -> Result<(), PublishError> {
        let receivers = self.forward(event.clone());
        tracing::debug!("Status event for flight {} delivered to {} subscriber(s)", event.flight_id, receivers);
        Ok(())
    }
}
