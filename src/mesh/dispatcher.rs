use tracing::{debug, error, info};

use super::{DispatchResult, MeshSender, TextMessage};
use crate::config::RadioConfig;
use crate::events::NotificationEvent;

/// Turns notification events into mesh sends and reports how they went.
///
/// Holds no mutable state; every call is independent of the previous one.
pub struct Dispatcher<S> {
    sender: S,
}

impl<S: MeshSender> Dispatcher<S> {
    pub fn new(sender: S) -> Self {
        Self { sender }
    }

    pub async fn probe(&self) -> bool {
        self.sender.probe_availability().await
    }

    /// Sends `event` on the configured channel. Failures are logged with the
    /// captured output and returned, never retried.
    pub async fn dispatch(&self, event: &NotificationEvent, radio: &RadioConfig) -> DispatchResult {
        info!(
            kind = %event.kind,
            "Sending message '{}' to channel index {}",
            event.message,
            radio.channel_index
        );

        let message = TextMessage {
            device_path: radio.device_path.clone(),
            channel_index: radio.channel_index,
            text: event.message.clone(),
            timeout: radio.send_timeout,
        };
        let result = self.sender.send_text(&message).await;
        log_result(&result, radio);
        result
    }
}

fn log_result(result: &DispatchResult, radio: &RadioConfig) {
    if result.success {
        info!("Message sent successfully");
        if !result.stdout.is_empty() {
            debug!("Meshtastic output: {}", result.stdout);
        }
        return;
    }

    if result.is_timeout() {
        error!(
            timeout = ?radio.send_timeout,
            device = %radio.device_path,
            "Meshtastic command timed out"
        );
        return;
    }

    match (&result.error, result.exit_code) {
        (Some(err), _) => error!("Failed to send Meshtastic message: {}", err),
        (None, Some(code)) => error!("Failed to send message. Return code: {}", code),
        (None, None) => error!("Failed to send message. Process terminated by signal"),
    }
    if !result.stderr.is_empty() {
        error!("Error output: {}", result.stderr);
    }
    if !result.stdout.is_empty() {
        error!("Standard output: {}", result.stdout);
    }
}
