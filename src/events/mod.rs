//! Sensor event translation
//!
//! Turns raw Zigbee2MQTT telemetry into notification events:
//!
//! 1. [`payload`] - UTF-8/JSON decoding into a schema-less [`SensorPayload`]
//! 2. [`classifier`] - fixed rule set producing zero or one [`NotificationEvent`]
//!
//! Both stages are pure; nothing in here touches the network or spawns processes.

pub mod classifier;
pub mod payload;

pub use classifier::{classify, EventKind, NotificationEvent};
pub use payload::{DecodeError, SensorPayload};
