//! Scripted single-purpose MQTT 3.1.1 broker for tests. Speaks just enough of
//! the protocol (CONNACK, SUBACK, PINGRESP, QoS 0 PUBLISH) to drive the client.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerSeen {
    Subscribed(Vec<String>),
    Disconnected,
}

enum Script {
    Silent,
    Refuse(u8),
    Sessions {
        drop_first: bool,
        publishes: Vec<(String, Vec<u8>)>,
    },
}

pub struct FakeBroker {
    pub port: u16,
    seen: mpsc::UnboundedReceiver<BrokerSeen>,
}

impl FakeBroker {
    /// Accepts the TCP connection but never answers CONNECT
    pub async fn silent() -> Self {
        Self::start(Script::Silent).await
    }

    pub async fn refusing(code: u8) -> Self {
        Self::start(Script::Refuse(code)).await
    }

    /// Closes the first session right after SUBACK, then serves a second one
    pub async fn dropping_first_session() -> Self {
        Self::start(Script::Sessions {
            drop_first: true,
            publishes: Vec::new(),
        })
        .await
    }

    /// Serves one session and publishes `messages` once the client subscribed
    pub async fn publishing(messages: &[(&str, &str)]) -> Self {
        Self::start(Script::Sessions {
            drop_first: false,
            publishes: messages
                .iter()
                .map(|(topic, payload)| (topic.to_string(), payload.as_bytes().to_vec()))
                .collect(),
        })
        .await
    }

    async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, seen) = mpsc::unbounded_channel();
        tokio::spawn(serve(listener, script, tx));
        Self { port, seen }
    }

    pub async fn next_seen(&mut self) -> BrokerSeen {
        time::timeout(Duration::from_secs(5), self.seen.recv())
            .await
            .expect("broker saw nothing within 5s")
            .expect("broker task ended")
    }

    /// Drains observations until the client's DISCONNECT arrives
    pub async fn until_disconnected(&mut self) -> bool {
        loop {
            match time::timeout(Duration::from_secs(5), self.seen.recv()).await {
                Ok(Some(BrokerSeen::Disconnected)) => return true,
                Ok(Some(BrokerSeen::Subscribed(_))) => continue,
                Ok(None) | Err(_) => return false,
            }
        }
    }
}

/// A port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn serve(listener: TcpListener, script: Script, tx: mpsc::UnboundedSender<BrokerSeen>) {
    match script {
        Script::Silent => {
            if let Ok((_socket, _)) = listener.accept().await {
                time::sleep(Duration::from_secs(30)).await;
            }
        }
        Script::Refuse(code) => {
            if let Ok((mut socket, _)) = listener.accept().await {
                if read_packet(&mut socket).await.is_ok() {
                    let _ = socket.write_all(&[0x20, 0x02, 0x00, code]).await;
                }
                time::sleep(Duration::from_secs(30)).await;
            }
        }
        Script::Sessions {
            drop_first,
            publishes,
        } => {
            let sessions = if drop_first { 2 } else { 1 };
            for n in 0..sessions {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let last = n + 1 == sessions;
                let publishes: &[(String, Vec<u8>)] = if last { &publishes } else { &[] };
                if session(&mut socket, &tx, publishes, !last).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn session(
    socket: &mut TcpStream,
    tx: &mpsc::UnboundedSender<BrokerSeen>,
    publishes: &[(String, Vec<u8>)],
    drop_after_suback: bool,
) -> io::Result<()> {
    // CONNECT
    read_packet(socket).await?;
    socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await?;

    loop {
        let (header, body) = read_packet(socket).await?;
        match header >> 4 {
            8 => {
                let topics = subscribed_topics(&body);
                let mut ack = vec![0x90];
                encode_length(2 + topics.len(), &mut ack);
                ack.extend_from_slice(&body[..2]);
                ack.extend(std::iter::repeat(0x00).take(topics.len()));
                socket.write_all(&ack).await?;
                let _ = tx.send(BrokerSeen::Subscribed(topics));

                if drop_after_suback {
                    return Ok(());
                }
                for (topic, payload) in publishes {
                    socket.write_all(&publish_packet(topic, payload)).await?;
                }
            }
            12 => socket.write_all(&[0xd0, 0x00]).await?,
            14 => {
                let _ = tx.send(BrokerSeen::Disconnected);
                return Ok(());
            }
            _ => {}
        }
    }
}

async fn read_packet(socket: &mut TcpStream) -> io::Result<(u8, Vec<u8>)> {
    let header = socket.read_u8().await?;
    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let byte = socket.read_u8().await?;
        length |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; length];
    socket.read_exact(&mut body).await?;
    Ok((header, body))
}

fn subscribed_topics(body: &[u8]) -> Vec<String> {
    let mut topics = Vec::new();
    let mut i = 2;
    while i + 2 <= body.len() {
        let len = u16::from_be_bytes([body[i], body[i + 1]]) as usize;
        let start = i + 2;
        let end = (start + len).min(body.len());
        topics.push(String::from_utf8_lossy(&body[start..end]).into_owned());
        // skip the requested QoS byte
        i = end + 1;
    }
    topics
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x30];
    encode_length(2 + topic.len() + payload.len(), &mut packet);
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

fn encode_length(mut length: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if length == 0 {
            break;
        }
    }
}
