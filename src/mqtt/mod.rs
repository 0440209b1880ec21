//! # MQTT Ingestion Module
//!
//! Connects the bridge to the Zigbee2MQTT broker and turns every delivered
//! publish into a call on the message pipeline.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── message.rs      - RawMessage, one broker delivery plus receive time
//! └── handler.rs      - connection state machine, (re)subscription, shutdown
//! ```
//!
//! ## Connection Lifecycle
//!
//! ```text
//! Disconnected ──start──► Connecting ──CONNACK──► Connected
//!       ▲                                            │
//!       └──────────── network error / DISCONNECT ────┘
//!
//! any state ──shutdown token──► Terminating
//! ```
//!
//! Reconnects are driven by rumqttc itself: polling the event loop after an
//! error opens a fresh connection. The handler only paces those attempts and
//! re-subscribes on every CONNACK, since sessions are clean and the broker
//! does not remember our filters.
//!
//! A failure before the first CONNACK is fatal and reported to the caller.
//! After that, connectivity problems are logged and never end the loop.

pub mod handler;
pub mod message;

#[cfg(test)]
pub mod fake_broker;

pub use handler::{BridgeStatus, ConnectionState, MqttHandler};
pub use message::RawMessage;
