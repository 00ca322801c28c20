// src/io/mqtt.rs
//
// MQTT adapter (rumqttc).
//
// The bridge announces itself on `<topic_base>/<client_id>/state`: `online`
// (retained) on every connection, `offline` as the last will and on shutdown.
// Incoming publishes on subscribed command topics are forwarded to the bridge
// through a bounded command queue. Publishes use `try_publish` so the dispatch
// loop never waits on the broker.

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tokio::time::Duration;

use super::Publisher;
use crate::error::TransportError;

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Bridge availability topic, also used for the last will.
    pub state_topic: String,
}

impl MqttConfig {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }
        options.set_last_will(LastWill::new(
            &self.state_topic,
            OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));
        options
    }
}

/// A publish received on a command topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttCommand {
    pub topic: String,
    pub payload: Vec<u8>,
}

// ============================================================================
// Client
// ============================================================================

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

impl MqttPublisher {
    /// Publish `offline` and request a clean disconnect. The event loop keeps
    /// running until the disconnect goes out.
    pub fn shutdown(&self, state_topic: &str) {
        if let Err(e) = self
            .client
            .try_publish(state_topic, QoS::AtLeastOnce, true, OFFLINE)
        {
            tracing::warn!(error = %e, "failed to publish offline state");
        }
        if let Err(e) = self.client.try_disconnect() {
            tracing::warn!(error = %e, "failed to request MQTT disconnect");
        }
    }
}

/// Create the client. Nothing is sent until the event loop is polled.
pub fn connect(config: &MqttConfig, capacity: usize) -> (MqttPublisher, EventLoop) {
    let (client, eventloop) = AsyncClient::new(config.options(), capacity.max(10));
    (MqttPublisher { client }, eventloop)
}

/// Drive the connection: announce `online` and (re)subscribe on every ConnAck,
/// forward command publishes, and exit once the disconnect has been sent.
/// Connection errors are logged and retried after a short pause.
pub async fn run_event_loop(
    publisher: MqttPublisher,
    mut eventloop: EventLoop,
    state_topic: String,
    subscriptions: Vec<String>,
    commands: mpsc::Sender<MqttCommand>,
    stop: Arc<AtomicBool>,
) {
    let client = publisher.client;
    loop {
        match tokio::time::timeout(Duration::from_millis(100), eventloop.poll()).await {
            Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                tracing::info!(topic = %state_topic, "MQTT connected");
                if let Err(e) = client.try_publish(&state_topic, QoS::AtLeastOnce, true, ONLINE) {
                    tracing::warn!(error = %e, "failed to publish online state");
                }
                for topic in &subscriptions {
                    if let Err(e) = client.try_subscribe(topic, QoS::AtMostOnce) {
                        tracing::warn!(topic = %topic, error = %e, "subscribe failed");
                    }
                }
            }
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                let command = MqttCommand {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                match commands.try_send(command) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(topic = %publish.topic, "command queue full, dropped command");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => {
                tracing::info!("MQTT disconnected");
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                tracing::warn!(error = %e, "MQTT connection error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(_) => {
                // Timeout - nothing pending
            }
        }
    }
}
