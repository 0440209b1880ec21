//! Per-message path from broker delivery to mesh send:
//!
//! ```text
//! RawMessage ──decode──► SensorPayload ──classify──► NotificationEvent ──dispatch──► DispatchResult
//! ```
//!
//! Every stage that can fail is logged and swallowed here, so whatever a sensor
//! publishes, [`MessagePipeline::handle`] returns and the MQTT loop carries on.

use chrono::Local;
use tracing::{debug, error, info};

use crate::config::RadioConfig;
use crate::events::{classify, NotificationEvent, SensorPayload};
use crate::mesh::{DispatchResult, Dispatcher, MeshSender};
use crate::mqtt::handler::BridgeStatus;
use crate::mqtt::message::RawMessage;

/// What happened to one delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Not UTF-8, not JSON, or not a JSON object
    Undecodable,
    /// Decoded fine, but no rule matched
    Ignored,
    Dispatched {
        event: NotificationEvent,
        result: DispatchResult,
    },
}

pub struct MessagePipeline<S> {
    dispatcher: Dispatcher<S>,
    radio: RadioConfig,
}

impl<S: MeshSender> MessagePipeline<S> {
    pub fn new(dispatcher: Dispatcher<S>, radio: RadioConfig) -> Self {
        Self { dispatcher, radio }
    }

    pub async fn handle(&self, message: &RawMessage, status: &mut BridgeStatus) -> MessageOutcome {
        status.messages_received += 1;
        status.last_activity = Some(Local::now());

        debug!(
            "Received message on topic '{}': {}",
            message.topic,
            message.excerpt()
        );

        let payload = match SensorPayload::decode(&message.payload) {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    topic = %message.topic,
                    payload = %message.excerpt(),
                    "Failed to decode MQTT payload: {}",
                    e
                );
                status.decode_failures += 1;
                return MessageOutcome::Undecodable;
            }
        };

        let Some(event) = classify(&payload) else {
            return MessageOutcome::Ignored;
        };
        status.events_classified += 1;

        info!(
            topic = %message.topic,
            "Matched {} event, sending message to Meshtastic channel...",
            event.kind
        );

        let result = self.dispatcher.dispatch(&event, &self.radio).await;
        if result.success {
            status.dispatches_succeeded += 1;
        } else {
            status.dispatches_failed += 1;
        }

        MessageOutcome::Dispatched { event, result }
    }
}
