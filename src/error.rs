//! Top-level error type for the bridge

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The mesh transport failed its startup probe
    #[error("Meshtastic CLI is not available")]
    MeshUnavailable,

    #[error("Failed to connect to MQTT broker {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: rumqttc::ConnectionError,
    },

    #[error("MQTT broker {host}:{port} did not acknowledge the connection within {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("MQTT broker refused the connection: {0:?}")]
    ConnectionRefused(rumqttc::ConnectReturnCode),

    #[error("Failed to subscribe: {0}")]
    Subscribe(#[from] rumqttc::ClientError),

    #[error("Ingestion task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
