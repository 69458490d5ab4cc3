// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! MQTT broker adapter.
//!
//! Publishes on `tele/<station>/{data,event,status}` and listens on
//! `cmnd/<station>/+` for operator commands. Events and status messages
//! are retained so a reconnecting dashboard sees the latest state.
//! Publishes while disconnected are dropped; retained topics heal on the
//! next publish after reconnect.

use anyhow::{anyhow, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::StreamingConfig;

/// Operator commands arriving over the broker command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerCommand {
    /// Acknowledge and shut the station down
    Restart,
    /// Request a sensor recalibration
    Calibrate,
    /// Toggle verbose diagnostics
    Debug,
    /// Publish an immediate status heartbeat
    Status,
}

impl BrokerCommand {
    fn parse(verb: &str) -> Option<Self> {
        match verb {
            "restart" => Some(Self::Restart),
            "calibrate" => Some(Self::Calibrate),
            "debug" => Some(Self::Debug),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

/// Topic set for one station.
#[derive(Debug, Clone)]
pub struct Topics {
    /// Periodic data summaries
    pub data: String,
    /// Per-event records, retained
    pub event: String,
    /// Status and heartbeats, retained
    pub status: String,
    /// Command prefix, subscribed with a `+` wildcard
    pub command_prefix: String,
}

impl Topics {
    /// Build the topic set for a station id.
    pub fn new(station_id: &str) -> Self {
        Self {
            data: format!("tele/{}/data", station_id),
            event: format!("tele/{}/event", station_id),
            status: format!("tele/{}/status", station_id),
            command_prefix: format!("cmnd/{}/", station_id),
        }
    }
}

/// Async MQTT client wrapper around the rumqttc event loop.
pub struct MqttClient {
    client: AsyncClient,
    topics: Topics,
    connected: Arc<AtomicBool>,
}

impl MqttClient {
    /// Connect to the broker and spawn the event-loop task. Decoded
    /// operator commands are forwarded on `command_tx`.
    pub fn new(
        config: &StreamingConfig,
        station_id: &str,
        command_tx: mpsc::Sender<BrokerCommand>,
    ) -> Result<Self> {
        let topics = Topics::new(station_id);
        let mut options = MqttOptions::new(station_id, &config.mqtt_broker, config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (&config.mqtt_username, &config.mqtt_password) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);
        let connected = Arc::new(AtomicBool::new(false));

        {
            let client = client.clone();
            let connected = connected.clone();
            let topics = topics.clone();
            let reconnect = Duration::from_secs(config.mqtt_reconnect_secs.max(5));
            tokio::spawn(async move {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("MQTT connected");
                            connected.store(true, Ordering::Relaxed);
                            let subscription = format!("{}+", topics.command_prefix);
                            if let Err(e) =
                                client.subscribe(subscription, QoS::AtLeastOnce).await
                            {
                                warn!("MQTT command subscription failed: {}", e);
                            }
                            let online =
                                r#"{"status":"online","message":"station connected"}"#.as_bytes();
                            let _ = client
                                .publish(
                                    topics.status.as_str(),
                                    QoS::AtLeastOnce,
                                    true,
                                    online.to_vec(),
                                )
                                .await;
                        }
                        Ok(Event::Incoming(Packet::Publish(msg))) => {
                            let Some(verb) = msg.topic.strip_prefix(&topics.command_prefix) else {
                                debug!("MQTT message on unexpected topic {}", msg.topic);
                                continue;
                            };
                            match BrokerCommand::parse(verb) {
                                Some(command) => {
                                    info!("MQTT command received: {}", verb);
                                    if command_tx.try_send(command).is_err() {
                                        warn!("command queue full, dropping {}", verb);
                                    }
                                }
                                None => {
                                    warn!("unknown MQTT command: {}", verb);
                                    let error = format!(
                                        r#"{{"status":"error","message":"unknown command: {}"}}"#,
                                        verb
                                    );
                                    let _ = client
                                        .publish(
                                            topics.status.as_str(),
                                            QoS::AtLeastOnce,
                                            true,
                                            error.into_bytes(),
                                        )
                                        .await;
                                }
                            }
                        }
                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            warn!("MQTT broker disconnected");
                            connected.store(false, Ordering::Relaxed);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            connected.store(false, Ordering::Relaxed);
                            warn!("MQTT error: {:?}; retrying in {:?}", e, reconnect);
                            tokio::time::sleep(reconnect).await;
                        }
                    }
                }
            });
        }

        Ok(Self {
            client,
            topics,
            connected,
        })
    }

    /// Whether the broker connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn publish_json<T: Serialize>(&self, topic: &str, payload: &T, retain: bool) -> Result<()> {
        if !self.is_connected() {
            debug!("MQTT disconnected, dropping publish to {}", topic);
            return Ok(());
        }
        let json = serde_json::to_vec(payload)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, json)
            .await
            .map_err(|e| anyhow!("MQTT publish to {} failed: {}", topic, e))
    }

    /// Publish a periodic data summary.
    pub async fn publish_data<T: Serialize>(&self, payload: &T) -> Result<()> {
        self.publish_json(&self.topics.data, payload, false).await
    }

    /// Publish a seismic event record, retained.
    pub async fn publish_event<T: Serialize>(&self, payload: &T) -> Result<()> {
        self.publish_json(&self.topics.event, payload, true).await
    }

    /// Publish a status payload, retained.
    pub async fn publish_status<T: Serialize>(&self, payload: &T) -> Result<()> {
        self.publish_json(&self.topics.status, payload, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_layout() {
        let topics = Topics::new("seismograph");
        assert_eq!(topics.data, "tele/seismograph/data");
        assert_eq!(topics.event, "tele/seismograph/event");
        assert_eq!(topics.status, "tele/seismograph/status");
        assert_eq!(topics.command_prefix, "cmnd/seismograph/");
    }

    #[test]
    fn test_command_verbs() {
        assert_eq!(BrokerCommand::parse("restart"), Some(BrokerCommand::Restart));
        assert_eq!(
            BrokerCommand::parse("calibrate"),
            Some(BrokerCommand::Calibrate)
        );
        assert_eq!(BrokerCommand::parse("debug"), Some(BrokerCommand::Debug));
        assert_eq!(BrokerCommand::parse("status"), Some(BrokerCommand::Status));
        assert_eq!(BrokerCommand::parse("flash"), None);
    }
}
