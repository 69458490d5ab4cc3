//! Streaming module - MQTT broker adapter and WebSocket push server

mod mqtt;
mod websocket;

pub use mqtt::{BrokerCommand, MqttClient, Topics};
pub use websocket::WsServer;

use serde::{Deserialize, Serialize};

/// Streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Enable MQTT
    pub mqtt_enabled: bool,
    /// Broker host
    pub mqtt_broker: String,
    /// Broker port
    pub mqtt_port: u16,
    /// Optional broker username
    pub mqtt_username: Option<String>,
    /// Optional broker password
    pub mqtt_password: Option<String>,
    /// Minimum seconds between reconnect attempts
    pub mqtt_reconnect_secs: u64,
    /// Data summary publish interval in seconds
    pub mqtt_data_interval_secs: u64,
    /// Status publish interval in seconds
    pub mqtt_status_interval_secs: u64,
    /// Heartbeat publish interval in seconds
    pub mqtt_heartbeat_interval_secs: u64,

    /// Enable the WebSocket push server
    pub websocket_enabled: bool,
    /// WebSocket listen port
    pub websocket_port: u16,
    /// Maximum concurrent push clients
    pub websocket_max_clients: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            mqtt_enabled: false,
            mqtt_broker: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            mqtt_reconnect_secs: 5,
            mqtt_data_interval_secs: 300,
            mqtt_status_interval_secs: 600,
            mqtt_heartbeat_interval_secs: 1800,

            websocket_enabled: true,
            websocket_port: 8765,
            websocket_max_clients: 10,
        }
    }
}
