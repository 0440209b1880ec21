use std::io;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio::time;
use tracing::{debug, error, info};

use super::{DispatchResult, MeshSender, TextMessage};
use crate::config::RadioConfig;

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("no command configured")]
    Empty,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// [`MeshSender`] that shells out to the `meshtastic` CLI
#[derive(Debug, Clone)]
pub struct MeshtasticCli {
    command: Vec<String>,
    probe_timeout: Duration,
}

impl MeshtasticCli {
    pub fn new(command: Vec<String>, probe_timeout: Duration) -> Self {
        Self {
            command,
            probe_timeout,
        }
    }

    pub fn from_config(radio: &RadioConfig) -> Self {
        Self::new(radio.command.clone(), radio.probe_timeout)
    }

    /// Runs the configured command with `args` appended. The child is killed
    /// when the timeout elapses.
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output, RunError> {
        let (program, leading) = self.command.split_first().ok_or(RunError::Empty)?;

        let mut cmd = Command::new(program);
        cmd.args(leading)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                Err(RunError::NotFound(program.clone()))
            }
            Ok(Err(e)) => Err(RunError::Io(e)),
            Err(_) => Err(RunError::Timeout(timeout)),
        }
    }
}

impl MeshSender for MeshtasticCli {
    async fn probe_availability(&self) -> bool {
        match self.run(&["--help"], self.probe_timeout).await {
            Ok(output) if output.status.success() => {
                info!("Meshtastic CLI is available");
                true
            }
            Ok(output) => {
                error!(
                    exit_code = ?output.status.code(),
                    "Meshtastic CLI returned error"
                );
                false
            }
            Err(RunError::Timeout(_)) => {
                error!("Meshtastic CLI command timed out");
                false
            }
            Err(RunError::NotFound(program)) => {
                error!(
                    "Meshtastic CLI not found ({}). Please install the meshtastic package.",
                    program
                );
                false
            }
            Err(e) => {
                error!("Failed to check Meshtastic CLI: {}", e);
                false
            }
        }
    }

    async fn send_text(&self, message: &TextMessage) -> DispatchResult {
        let channel = message.channel_index.to_string();
        let args = [
            "--port",
            message.device_path.as_str(),
            "--ch-index",
            channel.as_str(),
            "--send",
            message.text.as_str(),
        ];
        debug!(command = ?self.command, ?args, "invoking meshtastic");

        match self.run(&args, message.timeout).await {
            Ok(output) => DispatchResult::from_output(&output),
            Err(RunError::Timeout(_)) => DispatchResult::timed_out(),
            Err(e) => DispatchResult::failed(e.to_string()),
        }
    }
}
