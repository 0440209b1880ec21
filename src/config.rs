//! Bridge configuration
//!
//! Resolves broker, topic and radio settings once at startup. Values come from
//! three layers, highest precedence first:
//!
//! 1. process environment, then a `.env` file in the working directory,
//! 2. a TOML file (`BRIDGE_CONFIG`, or `<config dir>/meshtastic-zigbee-bridge/config.toml`),
//! 3. built-in defaults.
//!
//! Resolution itself is a pure function over a key lookup ([`BridgeConfig::from_sources`]),
//! so nothing here needs the real environment to be tested.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, Level};

pub const DEFAULT_BROKER: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TOPICS: &str = "zigbee2mqtt/motion_outdoor,zigbee2mqtt/door_outdoor";
pub const DEFAULT_CLIENT_ID: &str = "meshtastic-zigbee-bridge";
pub const DEFAULT_DEVICE_PATH: &str = "/dev/ttyUSB0";
pub const DEFAULT_CHANNEL_INDEX: u8 = 5;
pub const DEFAULT_MESH_COMMAND: &str = "meshtastic";

/// Highest channel slot a Meshtastic node exposes (slots 0..=7)
pub const MAX_CHANNEL_INDEX: u8 = 7;

const APP_DIR: &str = "meshtastic-zigbee-bridge";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("No MQTT topics configured")]
    NoTopics,

    #[error("Unable to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse config file {path}: {source}")]
    FileParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Broker connection parameters
#[derive(Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topic filters in subscription order, no duplicates
    pub topics: Vec<String>,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl MqttConfig {
    /// Username/password pair, only when both halves are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pw)) => Some((user.as_str(), pw.as_str())),
            _ => None,
        }
    }
}

impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("topics", &self.topics)
            .field("client_id", &self.client_id)
            .field("keep_alive", &self.keep_alive)
            .field("connect_timeout", &self.connect_timeout)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

/// Mesh radio and CLI parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioConfig {
    /// Program plus leading arguments used to reach the mesh CLI
    pub command: Vec<String>,
    pub device_path: String,
    pub channel_index: u8,
    pub send_timeout: Duration,
    pub probe_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    pub radio: RadioConfig,
    pub log_level: Level,
    pub shutdown_grace: Duration,
}

/// Optional TOML layer. Keys mirror the environment variable names in lowercase.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub mqtt_broker: Option<String>,
    pub mqtt_port: Option<u16>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topics: Option<Vec<String>>,
    pub mqtt_client_id: Option<String>,
    pub mqtt_keep_alive_secs: Option<u64>,
    pub mqtt_connect_timeout_secs: Option<u64>,
    pub mqtt_reconnect_delay_secs: Option<u64>,
    pub meshtastic_cmd: Option<String>,
    pub meshtastic_port: Option<String>,
    pub channel_index: Option<u8>,
    pub meshtastic_send_timeout_secs: Option<u64>,
    pub meshtastic_probe_timeout_secs: Option<u64>,
    pub log_level: Option<String>,
    pub shutdown_grace_secs: Option<u64>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::FileParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// An explicit `BRIDGE_CONFIG` path must exist; the per-user default is optional.
    pub fn discover<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = non_empty(lookup("BRIDGE_CONFIG")) {
            return Self::from_path(Path::new(&path));
        }

        match default_config_path() {
            Some(path) if path.is_file() => Self::from_path(&path),
            _ => Ok(Self::default()),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

impl BridgeConfig {
    /// Loads the optional config file, `.env` and the process environment.
    /// `.env` is only read, the process environment is never modified.
    pub fn load() -> Result<Self, ConfigError> {
        let dotenv = read_dotenv(Path::new(".env"));
        let lookup = layered(
            |key: &str| std::env::var(key).ok(),
            move |key: &str| dotenv.get(key).cloned(),
        );
        let file = FileConfig::discover(&lookup)?;
        Self::from_sources(file, &lookup)
    }

    pub fn from_sources<F>(file: FileConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| non_empty(lookup(key));

        let topics = match env("MQTT_TOPICS") {
            Some(raw) => parse_topics(raw.split(',')),
            None => match file.mqtt_topics {
                Some(list) => parse_topics(list.iter().map(String::as_str)),
                None => parse_topics(DEFAULT_TOPICS.split(',')),
            },
        };
        if topics.is_empty() {
            return Err(ConfigError::NoTopics);
        }

        let mqtt = MqttConfig {
            host: env("MQTT_BROKER")
                .or(file.mqtt_broker)
                .unwrap_or_else(|| DEFAULT_BROKER.to_string()),
            port: resolve(env("MQTT_PORT"), "MQTT_PORT", file.mqtt_port, DEFAULT_PORT)?,
            username: env("MQTT_USERNAME").or(file.mqtt_username),
            password: env("MQTT_PASSWORD").or(file.mqtt_password),
            topics,
            client_id: env("MQTT_CLIENT_ID")
                .or(file.mqtt_client_id)
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            keep_alive: seconds(
                env("MQTT_KEEP_ALIVE_SECS"),
                "MQTT_KEEP_ALIVE_SECS",
                file.mqtt_keep_alive_secs,
                60,
            )?,
            connect_timeout: seconds(
                env("MQTT_CONNECT_TIMEOUT_SECS"),
                "MQTT_CONNECT_TIMEOUT_SECS",
                file.mqtt_connect_timeout_secs,
                10,
            )?,
            reconnect_delay: seconds(
                env("MQTT_RECONNECT_DELAY_SECS"),
                "MQTT_RECONNECT_DELAY_SECS",
                file.mqtt_reconnect_delay_secs,
                5,
            )?,
        };

        let channel_index = resolve(
            env("CHANNEL_INDEX"),
            "CHANNEL_INDEX",
            file.channel_index,
            DEFAULT_CHANNEL_INDEX,
        )?;
        if channel_index > MAX_CHANNEL_INDEX {
            return Err(ConfigError::InvalidValue {
                key: "CHANNEL_INDEX",
                value: channel_index.to_string(),
                reason: format!("must be between 0 and {}", MAX_CHANNEL_INDEX),
            });
        }

        let command_line = env("MESHTASTIC_CMD")
            .or(file.meshtastic_cmd)
            .unwrap_or_else(|| DEFAULT_MESH_COMMAND.to_string());
        let command: Vec<String> = command_line.split_whitespace().map(String::from).collect();
        if command.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "MESHTASTIC_CMD",
                value: command_line,
                reason: "command must not be blank".to_string(),
            });
        }

        let radio = RadioConfig {
            command,
            device_path: env("MESHTASTIC_PORT")
                .or(file.meshtastic_port)
                .unwrap_or_else(|| DEFAULT_DEVICE_PATH.to_string()),
            channel_index,
            send_timeout: seconds(
                env("MESHTASTIC_SEND_TIMEOUT_SECS"),
                "MESHTASTIC_SEND_TIMEOUT_SECS",
                file.meshtastic_send_timeout_secs,
                30,
            )?,
            probe_timeout: seconds(
                env("MESHTASTIC_PROBE_TIMEOUT_SECS"),
                "MESHTASTIC_PROBE_TIMEOUT_SECS",
                file.meshtastic_probe_timeout_secs,
                10,
            )?,
        };

        // the event loop is not polled during a send, so no PINGREQ goes out
        if radio.send_timeout * 2 > mqtt.keep_alive {
            return Err(ConfigError::InvalidValue {
                key: "MESHTASTIC_SEND_TIMEOUT_SECS",
                value: radio.send_timeout.as_secs().to_string(),
                reason: format!(
                    "must be at most half of MQTT_KEEP_ALIVE_SECS ({}s)",
                    mqtt.keep_alive.as_secs()
                ),
            });
        }

        let level_raw = env("LOG_LEVEL")
            .or(file.log_level)
            .unwrap_or_else(|| "INFO".to_string());

        Ok(Self {
            mqtt,
            radio,
            log_level: parse_level(&level_raw)?,
            shutdown_grace: seconds(
                env("SHUTDOWN_GRACE_SECS"),
                "SHUTDOWN_GRACE_SECS",
                file.shutdown_grace_secs,
                10,
            )?,
        })
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded:");
        info!("  MQTT Broker: {}:{}", self.mqtt.host, self.mqtt.port);
        info!("  MQTT Topics: {}", self.mqtt.topics.join(", "));
        info!(
            "  MQTT Auth: {}",
            if self.mqtt.credentials().is_some() {
                "username/password"
            } else {
                "anonymous"
            }
        );
        info!("  Meshtastic Port: {}", self.radio.device_path);
        info!("  Channel Index: {}", self.radio.channel_index);
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn resolve<T>(
    raw: Option<String>,
    key: &'static str,
    from_file: Option<T>,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key,
                value,
                reason: e.to_string(),
            }),
        None => Ok(from_file.unwrap_or(default)),
    }
}

fn seconds(
    raw: Option<String>,
    key: &'static str,
    from_file: Option<u64>,
    default: u64,
) -> Result<Duration, ConfigError> {
    let secs = resolve(raw, key, from_file, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: secs.to_string(),
            reason: "must be at least one second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

/// Trims each entry, drops blanks and keeps the first occurrence of duplicates
pub fn parse_topics<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut topics: Vec<String> = Vec::new();
    for topic in raw.into_iter().map(str::trim).filter(|t| !t.is_empty()) {
        if !topics.iter().any(|known| known == topic) {
            topics.push(topic.to_string());
        }
    }
    topics
}

fn parse_level(raw: &str) -> Result<Level, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" | "critical" => Ok(Level::ERROR),
        _ => Err(ConfigError::InvalidValue {
            key: "LOG_LEVEL",
            value: raw.to_string(),
            reason: "expected one of trace, debug, info, warning, error, critical".to_string(),
        }),
    }
}

/// Key lookup that asks `primary` first and falls back where it has nothing non-blank
pub fn layered<A, B>(primary: A, fallback: B) -> impl Fn(&str) -> Option<String>
where
    A: Fn(&str) -> Option<String>,
    B: Fn(&str) -> Option<String>,
{
    move |key: &str| non_empty(primary(key)).or_else(|| fallback(key))
}

/// Missing or unreadable files yield no entries. Later duplicates win.
pub fn read_dotenv(path: &Path) -> HashMap<String, String> {
    match fs::read_to_string(path) {
        Ok(content) => parse_dotenv(&content).into_iter().collect(),
        Err(_) => HashMap::new(),
    }
}

pub fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), dotenv_value(value.trim())))
        })
        .collect()
}

fn dotenv_value(raw: &str) -> String {
    if let Some(rest) = raw.strip_prefix('\'') {
        if let Some(end) = rest.find('\'') {
            return rest[..end].to_string();
        }
        return raw.to_string();
    }

    if let Some(rest) = raw.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = rest.chars();
        while let Some(c) = chars.next() {
            match c {
                '"' => return value,
                '\\' => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(other) => value.push(other),
                    None => value.push('\\'),
                },
                c => value.push(c),
            }
        }
        // unterminated
        return raw.to_string();
    }

    match raw.find(" #").or_else(|| raw.find("\t#")) {
        Some(at) => raw[..at].trim_end().to_string(),
        None => raw.to_string(),
    }
}
