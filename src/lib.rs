//! Forwards Zigbee2MQTT sensor events (motion, door/tamper) to a Meshtastic
//! mesh channel as short text messages.

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod mesh;
pub mod mqtt;

pub use config::BridgeConfig;
pub use error::BridgeError;
