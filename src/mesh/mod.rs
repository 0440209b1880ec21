//! # Mesh dispatch boundary
//!
//! Everything that leaves the bridge towards the radio mesh passes through here.
//!
//! ## Module Architecture
//!
//! ```text
//! mesh/
//! ├── mod.rs         - MeshSender trait, TextMessage, DispatchResult
//! ├── cli.rs         - MeshSender backed by the meshtastic command line tool
//! └── dispatcher.rs  - NotificationEvent -> TextMessage, result logging
//! ```
//!
//! The transport sits behind [`MeshSender`] so the ingestion path only ever sees a
//! [`DispatchResult`]. A failed or timed out send is a value, never a panic or an
//! error that could unwind into the MQTT loop.

pub mod cli;
pub mod dispatcher;

use std::future::Future;
use std::process::Output;
use std::time::Duration;

pub use cli::MeshtasticCli;
pub use dispatcher::Dispatcher;

/// Error text reported when a send exceeds its time budget
pub const TIMEOUT_ERROR: &str = "timeout";

/// One outbound text on a specific channel of a specific radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    pub device_path: String,
    pub channel_index: u8,
    pub text: String,
    pub timeout: Duration,
}

/// Outcome of a single send attempt. Logged, then dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn from_output(output: &Output) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            error: None,
        }
    }

    pub fn delivered() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn timed_out() -> Self {
        Self::failed(TIMEOUT_ERROR)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(TIMEOUT_ERROR)
    }
}

/// Transport towards the mesh network
pub trait MeshSender: Send + Sync + 'static {
    /// Startup check that the transport can be used at all
    fn probe_availability(&self) -> impl Future<Output = bool> + Send;

    /// Sends one text. Must return within `message.timeout` (plus scheduling slack).
    fn send_text(&self, message: &TextMessage) -> impl Future<Output = DispatchResult> + Send;
}
