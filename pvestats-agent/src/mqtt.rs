//! MQTT session over rumqttc
//!
//! `connect` drives the event loop until the broker acknowledges the
//! connection, then hands the loop to a background task. Publishes are queued
//! on the client in order; `disconnect` queues a DISCONNECT behind them and
//! waits for the loop to wind down, so nothing queued is dropped.

use crate::config::MqttConfig;
use crate::error::{AgentError, Result};
use crate::publisher::MetricBus;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const REQUEST_CAPACITY: usize = 10;

pub struct MqttBus {
    client: AsyncClient,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

/// Fresh `pvestats-<uuid>` per run
pub fn client_id() -> String {
    format!("pvestats-{}", Uuid::new_v4().simple())
}

impl MqttBus {
    pub async fn connect(config: &MqttConfig) -> Result<Self> {
        let mut options = MqttOptions::new(client_id(), &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(true);
        options.set_credentials(&config.username, config.password.expose());

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        wait_for_connack(&mut eventloop).await?;
        info!(
            "Connected to MQTT broker {}:{}",
            config.broker_host, config.broker_port
        );

        let event_task = tokio::spawn(drive(eventloop));

        Ok(Self {
            client,
            event_task: Mutex::new(Some(event_task)),
        })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(AgentError::mqtt(format!("broker refused connection: {code:?}"))),
                };
            }
            Ok(event) => debug!("MQTT event before CONNACK: {:?}", event),
            Err(e) => return Err(AgentError::mqtt(format!("connection failed: {e}"))),
        }
    }
}

/// Polls until the DISCONNECT went out or the connection breaks
async fn drive(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => debug!("PUBACK {}", ack.pkid),
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT event loop stopped: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl MetricBus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| AgentError::mqtt(format!("publish to {topic} failed: {e}")))
    }

    async fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| AgentError::mqtt(format!("disconnect failed: {e}")))?;

        if let Some(task) = self.event_task.lock().await.take() {
            task.await
                .map_err(|e| AgentError::mqtt(format!("event loop task failed: {e}")))?;
        }
        info!("Disconnected from MQTT broker");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    #[test]
    fn test_client_ids_are_unique() {
        let a = client_id();
        let b = client_id();
        assert!(a.starts_with("pvestats-"));
        assert_eq!(a.len(), "pvestats-".len() + 32);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_fatal() {
        let config = MqttConfig {
            broker_host: "127.0.0.1".into(),
            // reserved port, nothing listens there
            broker_port: 1,
            username: "ha".into(),
            password: Secret::new("secret"),
            topic_prefix: "homelab".into(),
            discovery_prefix: "homeassistant/sensor".into(),
            keep_alive_secs: 60,
        };
        let result = MqttBus::connect(&config).await;
        assert!(matches!(result, Err(AgentError::Mqtt(_))));
    }
}
