use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use runway_core::events::StatusChangeEvent;
use runway_notify::StatusHub;
use tracing::{debug, error, info, warn};

/// Relays status events from Kafka into this instance's [`StatusHub`].
///
/// Each instance must use its own `group_id` so that every instance sees
/// every event. Starts from the latest offset; there is no history replay.
pub async fn start_status_relay(
    brokers: String,
    group_id: String,
    topic: String,
    hub: StatusHub,
) -> anyhow::Result<()> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .set("group.id", &group_id)
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", "latest")
        .create()?;

    consumer.subscribe(&[topic.as_str()])?;

    info!("Status relay started, listening to {} as {}", topic, group_id);

    loop {
        match consumer.recv().await {
            Err(e) => error!("Kafka error: {}", e),
            Ok(m) => match m.payload_view::<str>() {
                Some(Ok(payload)) => relay(&hub, payload),
                Some(Err(e)) => error!("Error reading payload: {}", e),
                None => warn!("Empty status message at offset {}", m.offset()),
            },
        }
    }
}

fn relay(hub: &StatusHub, payload: &str) {
    match serde_json::from_str::<StatusChangeEvent>(payload) {
        Ok(event) => {
            let flight_id = event.flight_id;
            let receivers = hub.forward(event);
            debug!(flight_id = %flight_id, "Relayed status event to {} subscriber(s)", receivers);
        }
        Err(e) => warn!("Dropping malformed status event: {}", e),
    }
}
