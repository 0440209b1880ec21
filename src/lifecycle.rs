//! Process lifecycle: startup order, signal handling, graceful shutdown.
//!
//! ```text
//! probe mesh CLI ──► connect broker ──► spawn ingestion task ──► wait for signal
//!                                                                    │
//!                       exit ◄── wait (bounded by grace) ◄── cancel ─┘
//! ```

use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bridge::MessagePipeline;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::mesh::{Dispatcher, MeshSender};
use crate::mqtt::handler::DISCONNECT_FLUSH;
use crate::mqtt::MqttHandler;

const ABORT_SLACK: Duration = Duration::from_secs(1);

/// Cancels `token` on SIGINT and, on Unix, SIGTERM
pub fn listen_for_shutdown(token: CancellationToken) {
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT, shutting down...");
                signal_token.cancel();
            }
            Err(err) => {
                error!("Error setting up signal handler: {}", err);
            }
        }
    });

    // SIGTERM handler is installed before this returns
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::spawn(async move {
                    if sigterm.recv().await.is_some() {
                        info!("Received SIGTERM, shutting down...");
                        token.cancel();
                    }
                });
            }
            Err(err) => error!("Error setting up SIGTERM handler: {}", err),
        }
    }
}

/// Runs the bridge until `shutdown` is cancelled.
///
/// Returns an error when the mesh probe fails (no broker connection is attempted
/// then), when the first broker connection fails, or when the ingestion task dies.
/// After a shutdown request an in-flight dispatch gets `config.shutdown_grace`,
/// then the broker is disconnected. The task is aborted only if even that stalls.
pub async fn run<S: MeshSender>(
    config: BridgeConfig,
    sender: S,
    shutdown: CancellationToken,
) -> Result<(), BridgeError> {
    info!("Starting Meshtastic Zigbee Bridge...");

    let dispatcher = Dispatcher::new(sender);
    if !dispatcher.probe().await {
        error!("Meshtastic CLI is not available, exiting");
        return Err(BridgeError::MeshUnavailable);
    }

    let mut handler = MqttHandler::new(&config.mqtt);
    tokio::select! {
        connected = handler.connect() => {
            if let Err(e) = connected {
                error!("Failed to connect to MQTT broker, exiting");
                return Err(e);
            }
        }
        _ = shutdown.cancelled() => {
            info!("Shutdown requested before the bridge was running");
            return Ok(());
        }
    }

    let pipeline = MessagePipeline::new(dispatcher, config.radio.clone());
    let mut ingestion = tokio::spawn(handler.run(
        pipeline,
        shutdown.clone(),
        config.shutdown_grace,
    ));
    info!("Bridge is running. Press Ctrl+C to stop.");

    let status = tokio::select! {
        joined = &mut ingestion => joined?,
        _ = shutdown.cancelled() => {
            info!("Cleaning up resources...");
            let hard_deadline = config.shutdown_grace + DISCONNECT_FLUSH + ABORT_SLACK;
            match time::timeout(hard_deadline, &mut ingestion).await {
                Ok(joined) => joined?,
                Err(_) => {
                    warn!("Ingestion did not stop within {:?}, aborting", hard_deadline);
                    ingestion.abort();
                    info!("Bridge stopped");
                    return Ok(());
                }
            }
        }
    };

    status.log_summary();
    info!("Bridge stopped");
    Ok(())
}
