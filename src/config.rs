//! # Configuration Management
//!
//! Login configuration for a bot session.
//!
//! [`BotConfiguration`] names the servers to try, the protocol variant to
//! speak, and every timeout the session layer applies. The network handler
//! reads it but never reinterprets it; validation happens once, when a
//! [`Bot`](crate::bot::Bot) is created.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()` (`TIM_PROTOCOL_*`)
//! - Direct instantiation with defaults and `default_with_overrides()`

use crate::core::packet::PacketVersion;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Servers used by the reference client
pub const DEFAULT_SERVERS: [&str; 3] = [
    "183.60.56.29:8000",
    "123.151.190.200:8000",
    "125.39.132.242:8000",
];

/// Default capacity of the unsolicited event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Protocol release to emulate. Selects the encode/decode variant of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub enum ProtocolVariant {
    /// TIM 2.3.2.21173, packet layouts captured 2019.11.02
    #[default]
    #[serde(rename = "tim-2.3.2")]
    Tim2_3_2,
}

impl ProtocolVariant {
    /// Client version word written into every frame header
    pub const fn client_version(self) -> u16 {
        match self {
            ProtocolVariant::Tim2_3_2 => 0x3713,
        }
    }

    pub const fn packet_version(self) -> PacketVersion {
        match self {
            ProtocolVariant::Tim2_3_2 => PacketVersion {
                date: "2019.11.02",
                tim_version: "2.3.2.21173",
            },
        }
    }
}

/// Order in which candidate servers are tried during login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerSelection {
    /// Try servers in the configured order
    #[default]
    Ordered,
    /// Shuffle the list before each login
    Random,
}

/// Everything a network handler needs to log in and run a session
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BotConfiguration {
    /// Candidate server addresses (`host:port`)
    pub servers: Vec<String>,

    /// How candidates are ordered
    pub server_selection: ServerSelection,

    /// Protocol variant to speak
    pub protocol: ProtocolVariant,

    /// Timeout for establishing the transport to one server
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Timeout for the whole login handshake
    #[serde(with = "duration_serde")]
    pub login_timeout: Duration,

    /// Default deadline for `send_and_expect`
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Interval between heartbeats while active
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// Deadline for a heartbeat response
    #[serde(with = "duration_serde")]
    pub heartbeat_timeout: Duration,

    /// Capacity of the unsolicited event channel
    pub event_capacity: usize,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for BotConfiguration {
    fn default() -> Self {
        Self {
            servers: DEFAULT_SERVERS.iter().map(|s| s.to_string()).collect(),
            server_selection: ServerSelection::Ordered,
            protocol: ProtocolVariant::default(),
            connect_timeout: timeout::DEFAULT_TIMEOUT,
            login_timeout: timeout::LOGIN_TIMEOUT,
            request_timeout: timeout::DEFAULT_TIMEOUT,
            heartbeat_interval: timeout::KEEPALIVE_INTERVAL,
            heartbeat_timeout: timeout::KEEPALIVE_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            logging: LoggingConfig::default(),
        }
    }
}

impl BotConfiguration {
    /// Read a TOML file and parse it with [`from_toml`](Self::from_toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(servers) = std::env::var("TIM_PROTOCOL_SERVERS") {
            config.servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(selection) = std::env::var("TIM_PROTOCOL_SERVER_SELECTION") {
            config.server_selection = match selection.to_ascii_lowercase().as_str() {
                "ordered" => ServerSelection::Ordered,
                "random" => ServerSelection::Random,
                other => {
                    return Err(ProtocolError::ConfigError(format!(
                        "Unknown server selection '{other}' (expected 'ordered' or 'random')"
                    )))
                }
            };
        }

        if let Ok(timeout) = std::env::var("TIM_PROTOCOL_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.connect_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("TIM_PROTOCOL_REQUEST_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.request_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(heartbeat) = std::env::var("TIM_PROTOCOL_HEARTBEAT_INTERVAL_MS") {
            if let Ok(val) = heartbeat.parse::<u64>() {
                config.heartbeat_interval = Duration::from_millis(val);
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Servers in the order login should try them
    pub fn candidate_servers(&self) -> Vec<String> {
        let mut servers = self.servers.clone();
        if self.server_selection == ServerSelection::Random {
            servers.shuffle(&mut rand::rng());
        }
        servers
    }

    /// Every problem found, one message each. Empty means usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.servers.is_empty() {
            errors.push("At least one server address must be configured".to_string());
        }
        for server in &self.servers {
            if server.parse::<std::net::SocketAddr>().is_err() {
                errors.push(format!(
                    "Invalid server address format: '{server}' (expected format: '183.60.56.29:8000')"
                ));
            }
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        if self.login_timeout < self.connect_timeout {
            errors.push("Login timeout must not be shorter than the connect timeout".to_string());
        }

        if self.request_timeout.as_millis() < 10 {
            errors.push("Request timeout too short (minimum: 10ms)".to_string());
        }

        if self.heartbeat_interval.as_millis() < 100 {
            errors.push("Heartbeat interval too short (minimum: 100ms)".to_string());
        } else if self.heartbeat_interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if self.heartbeat_timeout >= self.heartbeat_interval {
            errors.push("Heartbeat timeout must be shorter than the heartbeat interval".to_string());
        }

        if self.event_capacity == 0 {
            errors.push("Event capacity must be greater than 0".to_string());
        } else if self.event_capacity > 1_000_000 {
            errors.push(format!(
                "Event capacity too large: {} (max recommended: 1,000,000)",
                self.event_capacity
            ));
        }

        errors.extend(self.logging.validate());

        errors
    }

    /// [`validate`](Self::validate) folded into a single [`ProtocolError::ConfigError`]
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("tim-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_servers_ordered() {
        let config = BotConfiguration::default();
        assert_eq!(config.candidate_servers(), config.servers);
    }

    #[test]
    fn test_candidate_servers_random_is_permutation() {
        let config = BotConfiguration::default_with_overrides(|c| {
            c.server_selection = ServerSelection::Random;
        });
        let mut shuffled = config.candidate_servers();
        shuffled.sort();
        let mut expected = config.servers.clone();
        expected.sort();
        assert_eq!(shuffled, expected);
    }

    #[test]
    fn test_variant_metadata() {
        let variant = ProtocolVariant::Tim2_3_2;
        assert_eq!(variant.client_version(), 0x3713);
        assert_eq!(variant.packet_version().date, "2019.11.02");
    }
}
