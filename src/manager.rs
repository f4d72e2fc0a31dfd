use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::messages::{BusEvent, RoomState};
use crate::mqtt::MqttClient;
use crate::tracker::RoomTracker;

/// Owns the tracker for one device and drives it from bus events and the
/// periodic tick. Every tracker mutation happens on the task running
/// `run_loop`, so message handling and recomputes never overlap.
pub struct Manager {
    tracker: RoomTracker,
    mqtt_client: MqttClient,
    last_published: Option<RoomState>,
}

impl Manager {
    pub fn new(tracker: RoomTracker, mqtt_client: MqttClient) -> Self {
        Manager {
            tracker,
            mqtt_client,
            last_published: None,
        }
    }

    pub async fn run_loop(mut self, mut eventloop: rumqttc::EventLoop) -> anyhow::Result<()> {
        let (tx, mut rx) = broadcast::channel(64);

        let client = self.mqtt_client.clone();
        let mqtt_handle = tokio::task::spawn(async move {
            client.event_loop(&mut eventloop, tx).await;
        });

        let mut ticker = tokio::time::interval(self.tracker.config().update_interval());
        info!(
            "Tracking {} every {:?}, publishing on {}",
            self.tracker.config().device_id,
            self.tracker.config().update_interval(),
            self.mqtt_client.state_topic()
        );

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Ok(event) => {
                        if let Some(state) = self.handle_event(event, Instant::now()) {
                            self.publish(state).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Tracker lagged, {skipped} messages skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event channel closed");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let state = self.tracker.recompute(Instant::now());
                    self.publish(state).await;
                }
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
            }
        }

        self.teardown(mqtt_handle).await;
        info!("Exiting manager event loop");

        Ok(())
    }

    /// Runs every step even when an earlier one fails, so the event loop
    /// task is always joined.
    async fn teardown(&self, mqtt_handle: JoinHandle<()>) {
        if let Err(err) = self.mqtt_client.unsubscribe().await {
            warn!("Error unsubscribing: {err}");
        }
        if let Err(err) = self.mqtt_client.disconnect().await {
            warn!("Error disconnecting MQTT client: {:?}", err);
        }
        if let Err(err) = mqtt_handle.await {
            warn!("MQTT event loop task failed: {:?}", err);
        }
    }

    /// Applies one bus event to the tracker. Returns the state computed from
    /// an accepted message.
    fn handle_event(&mut self, event: BusEvent, now: Instant) -> Option<RoomState> {
        match event {
            BusEvent::Message { topic, payload } => {
                match self.tracker.handle_message(&topic, &payload, now) {
                    Ok(state) => state,
                    Err(err) => {
                        warn!("{err}");
                        None
                    }
                }
            }
            BusEvent::Subscribed => {
                debug!("Subscription renewed, resetting tracker state");
                self.tracker.reset();
                None
            }
        }
    }

    /// True unless `state` is exactly what was last published.
    fn is_unpublished(&self, state: &RoomState) -> bool {
        self.last_published.as_ref() != Some(state)
    }

    async fn publish(&mut self, state: RoomState) {
        if !self.is_unpublished(&state) {
            return;
        }
        match self.mqtt_client.publish_state(&state).await {
            Ok(()) => self.last_published = Some(state),
            Err(err) => warn!("Error publishing state: {err}"),
        }
    }
}
