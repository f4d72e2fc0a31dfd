use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{MqttOptions, QoS};
use tokio::sync::{Mutex, broadcast};

use crate::config;
use crate::error::RoomError;
use crate::messages::{BusEvent, RoomState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subscription {
    /// Not subscribed yet, e.g. the broker was not reachable at startup.
    Pending,
    Active,
    /// Torn down; never subscribed again.
    Closed,
}

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    topic_filter: String,
    state_topic: String,
    subscription: Arc<Mutex<Subscription>>,
}

impl MqttClient {
    pub fn new(
        config: &config::MqttConfig,
        tracker: &config::TrackerConfig,
    ) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or_else(|| "mqtt-room".to_string());

        let mut mqttoptions = MqttOptions::new(
            publisher_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        let topic_path = config
            .topic_path
            .clone()
            .unwrap_or_else(|| "mqtt_room".to_string());

        (
            MqttClient {
                client,
                topic_filter: format!("{}/+", tracker.device_id),
                state_topic: format!(
                    "{}/{}/{}",
                    topic_path,
                    publisher_id,
                    sanitize_name(&tracker.name)
                ),
                subscription: Arc::new(Mutex::new(Subscription::Pending)),
            },
            eventloop,
        )
    }

    pub fn state_topic(&self) -> &str {
        &self.state_topic
    }

    /// Subscribes to the device's distance topics. Returns false once the
    /// client has been torn down.
    pub async fn subscribe(&self) -> Result<bool, RoomError> {
        if self.is_closed().await {
            return Ok(false);
        }
        // The lock is not held while waiting for request capacity: the
        // event loop takes it too and is the one draining the requests.
        self.client
            .subscribe(self.topic_filter.clone(), QoS::AtMostOnce)
            .await?;

        let mut subscription = self.subscription.lock().await;
        if *subscription == Subscription::Closed {
            return Ok(false);
        }
        *subscription = Subscription::Active;
        info!("Subscribed to {}", self.topic_filter);
        Ok(true)
    }

    /// Idempotent. Returns true only for the call that actually sent the
    /// unsubscribe request.
    pub async fn unsubscribe(&self) -> Result<bool, RoomError> {
        let previous = {
            let mut subscription = self.subscription.lock().await;
            std::mem::replace(&mut *subscription, Subscription::Closed)
        };
        if previous != Subscription::Active {
            debug!("Unsubscribe skipped, subscription was {previous:?}");
            return Ok(false);
        }
        self.client.unsubscribe(self.topic_filter.clone()).await?;
        info!("Unsubscribed from {}", self.topic_filter);
        Ok(true)
    }

    /// Called from the event loop itself, so it must not wait for request
    /// capacity.
    async fn resubscribe(&self) -> bool {
        let mut subscription = self.subscription.lock().await;
        if *subscription == Subscription::Closed {
            return false;
        }
        match self
            .client
            .try_subscribe(self.topic_filter.clone(), QoS::AtMostOnce)
        {
            Ok(()) => {
                if *subscription == Subscription::Pending {
                    info!("Subscribed to {} after connecting", self.topic_filter);
                }
                *subscription = Subscription::Active;
                true
            }
            Err(err) => {
                error!("Error subscribing to MQTT topics, will retry: {:?}", err);
                *subscription = Subscription::Pending;
                false
            }
        }
    }

    async fn is_closed(&self) -> bool {
        *self.subscription.lock().await == Subscription::Closed
    }

    async fn is_pending(&self) -> bool {
        *self.subscription.lock().await == Subscription::Pending
    }

    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        tx: broadcast::Sender<BusEvent>,
    ) {
        let mut connected = false;
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        debug!("Received MQTT message on topic {}: {:?}", p.topic, p.payload);

                        let message = BusEvent::Message {
                            topic: p.topic,
                            payload: p.payload.to_vec(),
                        };
                        if let Err(err) = tx.send(message) {
                            error!("Error forwarding MQTT message: {:?}", err);
                        }
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        debug!("Connection acknowledged");
                        connected = true;
                        if self.resubscribe().await && tx.send(BusEvent::Subscribed).is_err() {
                            debug!("No tracker listening for subscription events");
                        }
                    }
                    rumqttc::Event::Outgoing(rumqttc::Outgoing::Disconnect) => {
                        debug!("Disconnect sent, leaving MQTT event loop");
                        break;
                    }
                    _ => {
                        // Retry a subscription that could not be queued on ConnAck.
                        if connected
                            && self.is_pending().await
                            && self.resubscribe().await
                            && tx.send(BusEvent::Subscribed).is_err()
                        {
                            debug!("No tracker listening for subscription events");
                        }
                    }
                },
                Err(e) => {
                    connected = false;
                    if self.is_closed().await {
                        debug!("MQTT event loop closed: {:?}", e);
                        break;
                    }
                    warn!("Error polling MQTT event loop: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    pub async fn publish_state(&self, state: &RoomState) -> Result<(), RoomError> {
        let payload = serde_json::to_vec(state).map_err(RoomError::Encode)?;
        debug!("Publishing {} on {}", state.state, self.state_topic);
        self.client
            .publish(self.state_topic.clone(), QoS::AtMostOnce, true, payload)
            .await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

fn sanitize_name(name: &str) -> String {
    // Remove any non-alphanumeric characters and replace spaces with underscores
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MqttConfig, TrackerConfig};

    fn client() -> (MqttClient, rumqttc::EventLoop) {
        let mqtt = MqttConfig {
            host: "localhost".to_string(),
            port: None,
            username: None,
            password: None,
            publisher_id: Some("hall".to_string()),
            topic_path: None,
            keep_alive_seconds: None,
        };
        MqttClient::new(&mqtt, &TrackerConfig::new("Alice's Phone", "espresense/devices/phone"))
    }

    #[test]
    fn test_sanitize_name() {
        let name = "Test's Device 123";
        let sanitized = super::sanitize_name(name);
        assert_eq!(sanitized, "test_s_device_123");
    }

    #[test]
    fn test_topics() {
        let (client, _eventloop) = client();
        assert_eq!(client.topic_filter, "espresense/devices/phone/+");
        assert_eq!(client.state_topic(), "mqtt_room/hall/alice_s_phone");
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        // The event loop is never polled; requests stay queued in its channel.
        let (client, _eventloop) = client();
        assert!(client.subscribe().await.unwrap());

        assert!(client.unsubscribe().await.unwrap());
        assert!(!client.unsubscribe().await.unwrap());
        assert!(!client.subscribe().await.unwrap());
    }

    fn fill_requests(client: &MqttClient) -> usize {
        let mut queued = 0;
        while client
            .client
            .try_publish("mqtt_room/filler", QoS::AtMostOnce, false, Vec::new())
            .is_ok()
        {
            queued += 1;
        }
        queued
    }

    #[tokio::test]
    async fn test_unsubscribe_does_not_block_event_loop() {
        let (client, _eventloop) = client();
        assert!(client.subscribe().await.unwrap());
        assert!(fill_requests(&client) > 0);

        // Waits for request capacity that only the event loop can free.
        let unsubscriber = client.clone();
        let handle = tokio::spawn(async move { unsubscriber.unsubscribe().await });
        tokio::task::yield_now().await;

        let closed = tokio::time::timeout(Duration::from_secs(1), client.is_closed()).await;
        assert_eq!(closed.ok(), Some(true));
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test]
    async fn test_failed_resubscribe_stays_pending() {
        let (client, _eventloop) = client();
        fill_requests(&client);

        assert!(!client.resubscribe().await);
        assert!(client.is_pending().await);
        // Nothing was subscribed, so there is nothing to unsubscribe.
        assert!(!client.unsubscribe().await.unwrap());
        assert!(!client.resubscribe().await);
        assert!(!client.is_pending().await);
    }

    #[tokio::test]
    async fn test_unsubscribe_before_subscribe() {
        let (client, _eventloop) = client();
        assert!(!client.unsubscribe().await.unwrap());
        assert!(!client.unsubscribe().await.unwrap());
    }
}
