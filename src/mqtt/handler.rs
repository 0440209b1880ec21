use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    QoS, SubscribeFilter,
};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::message::RawMessage;
use crate::bridge::MessagePipeline;
use crate::config::MqttConfig;
use crate::error::BridgeError;
use crate::mesh::MeshSender;

const REQUEST_CAPACITY: usize = 10;
pub const DISCONNECT_FLUSH: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Terminating,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Default)]
pub struct BridgeStatus {
    pub connection_state: ConnectionState,
    pub messages_received: usize,
    pub decode_failures: usize,
    pub events_classified: usize,
    pub dispatches_succeeded: usize,
    pub dispatches_failed: usize,
    pub dispatches_interrupted: usize,
    pub reconnects: usize,
    pub last_activity: Option<DateTime<Local>>,
}

impl BridgeStatus {
    pub fn log_summary(&self) {
        info!(
            received = self.messages_received,
            decode_failures = self.decode_failures,
            events = self.events_classified,
            sent = self.dispatches_succeeded,
            failed = self.dispatches_failed,
            interrupted = self.dispatches_interrupted,
            reconnects = self.reconnects,
            last_activity = ?self.last_activity,
            "Bridge session summary"
        );
    }
}

/// Owns the broker connection: connect, (re)subscribe, feed publishes into the
/// pipeline, disconnect on shutdown.
pub struct MqttHandler {
    client: AsyncClient,
    eventloop: EventLoop,
    config: MqttConfig,
    status: BridgeStatus,
    ever_connected: bool,
}

impl MqttHandler {
    pub fn new(config: &MqttConfig) -> Self {
        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);
        mqtt_options
            .set_keep_alive(config.keep_alive)
            .set_clean_session(true);
        if let Some((user, pw)) = config.credentials() {
            mqtt_options.set_credentials(user, pw);
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        MqttHandler {
            client,
            eventloop,
            config: config.clone(),
            status: BridgeStatus::default(),
            ever_connected: false,
        }
    }

    pub fn status(&self) -> &BridgeStatus {
        &self.status
    }

    /// Waits for the first CONNACK. Any failure here is fatal for the process.
    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        info!(
            "Connecting to MQTT broker {}:{}",
            self.config.host, self.config.port
        );
        self.transition(ConnectionState::Connecting);

        let eventloop = &mut self.eventloop;
        let handshake = time::timeout(self.config.connect_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack),
                    Ok(_) => continue,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        let ack = match handshake {
            Ok(Ok(ack)) => ack,
            Ok(Err(source)) => {
                self.transition(ConnectionState::Disconnected);
                return Err(BridgeError::Connect {
                    host: self.config.host.clone(),
                    port: self.config.port,
                    source,
                });
            }
            Err(_) => {
                self.transition(ConnectionState::Disconnected);
                return Err(BridgeError::ConnectTimeout {
                    host: self.config.host.clone(),
                    port: self.config.port,
                    timeout: self.config.connect_timeout,
                });
            }
        };

        self.on_connack(ack).await
    }

    async fn on_connack(&mut self, ack: ConnAck) -> Result<(), BridgeError> {
        if ack.code != ConnectReturnCode::Success {
            error!(
                "Failed to connect to MQTT broker, return code {:?}",
                ack.code
            );
            self.transition(ConnectionState::Disconnected);
            return Err(BridgeError::ConnectionRefused(ack.code));
        }

        if self.ever_connected {
            self.status.reconnects += 1;
        }
        self.ever_connected = true;
        self.transition(ConnectionState::Connected);
        info!("Connected to MQTT broker");

        // clean session: the broker forgot our filters, so every CONNACK re-subscribes
        let filters = self
            .config
            .topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce));
        self.client.subscribe_many(filters).await?;
        for topic in &self.config.topics {
            info!("Subscribed to topic: {}", topic);
        }
        Ok(())
    }

    /// Processes broker traffic until `shutdown` fires, then disconnects cleanly.
    /// Messages are handled one at a time in delivery order.
    ///
    /// A dispatch still running when `shutdown` fires gets `drain` to finish.
    /// After that it is dropped, which kills the mesh subprocess, and the
    /// DISCONNECT is still sent.
    pub async fn run<S: MeshSender>(
        mut self,
        pipeline: MessagePipeline<S>,
        shutdown: CancellationToken,
        drain: Duration,
    ) -> BridgeStatus {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = RawMessage::new(publish.topic, publish.payload.to_vec());
                    let deadline = async {
                        shutdown.cancelled().await;
                        time::sleep(drain).await;
                    };
                    let interrupted = tokio::select! {
                        _ = pipeline.handle(&message, &mut self.status) => false,
                        _ = deadline => true,
                    };
                    if interrupted {
                        warn!(
                            topic = %message.topic,
                            "Dispatch still running {:?} after shutdown, abandoning it",
                            drain
                        );
                        self.status.dispatches_interrupted += 1;
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if let Err(e) = self.on_connack(ack).await {
                        error!("Failed to restore session after reconnect: {}", e);
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(pkid = ack.pkid, codes = ?ack.return_codes, "subscription acknowledged");
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    info!("Disconnected from MQTT broker (broker initiated)");
                    self.transition(ConnectionState::Disconnected);
                }
                Ok(_) => {}
                Err(e) => {
                    if self.status.connection_state == ConnectionState::Connected {
                        warn!("Disconnected from MQTT broker: {}", e);
                    } else {
                        debug!("Reconnect attempt failed: {}", e);
                    }
                    self.transition(ConnectionState::Disconnected);

                    // rumqttc reconnects on the next poll; pace the attempts
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = time::sleep(self.config.reconnect_delay) => {
                            self.transition(ConnectionState::Connecting);
                        }
                    }
                }
            }
        }

        self.shutdown().await;
        self.status
    }

    async fn shutdown(&mut self) {
        let was_connected = self.status.connection_state == ConnectionState::Connected;
        self.transition(ConnectionState::Terminating);
        if !was_connected {
            return;
        }

        if let Err(e) = self.client.disconnect().await {
            warn!("Failed to queue MQTT disconnect: {}", e);
            return;
        }

        // the DISCONNECT only leaves once the event loop is polled
        let eventloop = &mut self.eventloop;
        let flushed = time::timeout(DISCONNECT_FLUSH, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if flushed.is_err() {
            warn!("MQTT disconnect was not flushed within {:?}", DISCONNECT_FLUSH);
        } else {
            info!("Disconnected from MQTT broker");
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        let previous = self.status.connection_state;
        if previous != next {
            debug!("MQTT connection state: {} -> {}", previous, next);
            self.status.connection_state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MessagePipeline;
    use crate::config::RadioConfig;
    use crate::mesh::testing::RecordingSender;
    use crate::mesh::Dispatcher;
    use crate::mqtt::fake_broker::{closed_port, BrokerSeen, FakeBroker};

    fn mqtt_config(port: u16) -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: None,
            password: None,
            topics: vec![
                "zigbee2mqtt/motion_outdoor".to_string(),
                "zigbee2mqtt/door_outdoor".to_string(),
            ],
            client_id: "bridge-test".to_string(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(1),
        }
    }

    fn pipeline(sender: RecordingSender) -> MessagePipeline<RecordingSender> {
        MessagePipeline::new(
            Dispatcher::new(sender),
            RadioConfig {
                command: vec!["meshtastic".to_string()],
                device_path: "/dev/ttyUSB0".to_string(),
                channel_index: 5,
                send_timeout: Duration::from_secs(30),
                probe_timeout: Duration::from_secs(10),
            },
        )
    }

    #[tokio::test]
    async fn connect_fails_when_broker_is_unreachable() {
        let port = closed_port().await;
        let mut handler = MqttHandler::new(&mqtt_config(port));

        let err = handler.connect().await.unwrap_err();

        assert!(matches!(err, BridgeError::Connect { .. }), "{err}");
        assert_eq!(handler.status().connection_state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_times_out_without_connack() {
        let broker = FakeBroker::silent().await;
        let mut handler = MqttHandler::new(&mqtt_config(broker.port));

        let err = handler.connect().await.unwrap_err();

        assert!(matches!(err, BridgeError::ConnectTimeout { .. }), "{err}");
    }

    #[tokio::test]
    async fn connect_reports_refused_session() {
        let broker = FakeBroker::refusing(0x05).await;
        let mut handler = MqttHandler::new(&mqtt_config(broker.port));

        let err = handler.connect().await.unwrap_err();

        assert!(
            matches!(
                err,
                BridgeError::Connect { .. } | BridgeError::ConnectionRefused(_)
            ),
            "{err}"
        );
    }

    #[tokio::test]
    async fn resubscribes_after_broker_drops_connection() {
        let mut broker = FakeBroker::dropping_first_session().await;
        let mut handler = MqttHandler::new(&mqtt_config(broker.port));
        handler.connect().await.unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(handler.run(
            pipeline(RecordingSender::delivering()),
            shutdown.clone(),
            Duration::from_secs(3),
        ));

        let expected = vec![
            "zigbee2mqtt/motion_outdoor".to_string(),
            "zigbee2mqtt/door_outdoor".to_string(),
        ];
        assert_eq!(broker.next_seen().await, BrokerSeen::Subscribed(expected.clone()));
        assert_eq!(broker.next_seen().await, BrokerSeen::Subscribed(expected));

        shutdown.cancel();
        let status = time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(status.reconnects, 1);
        assert_eq!(status.connection_state, ConnectionState::Terminating);
        assert!(broker.until_disconnected().await);
    }

    async fn run_until_first_send(
        sender: RecordingSender,
        drain: Duration,
    ) -> (FakeBroker, BridgeStatus) {
        let broker = FakeBroker::publishing(&[(
            "zigbee2mqtt/motion_outdoor",
            r#"{"occupancy":true}"#,
        )])
        .await;
        let mut handler = MqttHandler::new(&mqtt_config(broker.port));
        handler.connect().await.unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(handler.run(pipeline(sender.clone()), shutdown.clone(), drain));

        time::timeout(Duration::from_secs(5), async {
            while sender.sent_texts().is_empty() {
                time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("dispatch never started");
        shutdown.cancel();

        let status = time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();
        (broker, status)
    }

    #[tokio::test]
    async fn in_flight_dispatch_finishes_within_drain() {
        let sender = RecordingSender::stalling(Duration::from_millis(300));
        let (mut broker, status) = run_until_first_send(sender, Duration::from_secs(3)).await;

        assert_eq!(status.dispatches_succeeded, 1);
        assert_eq!(status.dispatches_interrupted, 0);
        assert!(broker.until_disconnected().await);
    }

    #[tokio::test]
    async fn stuck_dispatch_is_abandoned_and_broker_still_gets_disconnect() {
        let sender = RecordingSender::stalling(Duration::from_secs(20));
        let started = time::Instant::now();
        let (mut broker, status) = run_until_first_send(sender, Duration::from_millis(500)).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(status.dispatches_interrupted, 1);
        assert_eq!(status.dispatches_succeeded, 0);
        assert_eq!(status.connection_state, ConnectionState::Terminating);
        assert!(broker.until_disconnected().await);
    }
}
