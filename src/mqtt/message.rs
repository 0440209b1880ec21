use chrono::{DateTime, Local};
use std::fmt;

/// Longest payload excerpt that ends up in a log line
const EXCERPT_CHARS: usize = 200;

/// A single broker delivery, consumed right after decoding
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        RawMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }

    /// Lossy, length-bounded view of the payload for diagnostics
    pub fn excerpt(&self) -> String {
        let text = String::from_utf8_lossy(&self.payload);
        let mut chars = text.chars();
        let mut preview: String = chars.by_ref().take(EXCERPT_CHARS).collect();
        if chars.next().is_some() {
            preview.push_str("...");
        }
        preview
    }
}

impl fmt::Display for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {}: {}",
            self.received_at.format("%Y-%m-%d %H:%M:%S"),
            self.topic,
            self.excerpt()
        )
    }
}
