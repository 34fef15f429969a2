/*!
 * Configuration types for sensorlink
 */

use sensorlink_connect::{ConnectOptions, Framing};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for streaming sessions
///
/// The collector address and port are not part of it: they are supplied to
/// every `start` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Frame delimiting on the wire
    #[serde(default)]
    pub framing: Framing,

    /// What to do with the collector's reply to the greeting
    #[serde(default)]
    pub ack_policy: AckPolicy,

    /// What happens to the connection and started producers when a session ends
    #[serde(default)]
    pub terminal_policy: TerminalPolicy,

    /// Connect timeout in milliseconds (None = transport default)
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    /// Disable Nagle's algorithm on the collector socket
    #[serde(default = "default_true")]
    pub nodelay: bool,

    /// Largest chunk read from the collector in one receive
    #[serde(default = "default_receive_buffer_size")]
    pub receive_buffer_size: usize,

    /// Relay one imagery frame after the ranging frame
    #[serde(default)]
    pub relay_imagery: bool,

    /// Interval at which the ranging producer re-delivers the latest depth map
    #[serde(default = "default_ranging_poll_interval")]
    pub ranging_poll_interval_ms: u64,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            framing: Framing::Raw,
            ack_policy: AckPolicy::LogOnly,
            terminal_policy: TerminalPolicy::Teardown,
            connect_timeout_ms: None,
            nodelay: true,
            receive_buffer_size: default_receive_buffer_size(),
            relay_imagery: false,
            ranging_poll_interval_ms: default_ranging_poll_interval(),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// Handling of the one inbound receive issued after the greeting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Log whatever arrives (or the failure) and keep streaming
    #[default]
    LogOnly,

    /// Wait for the reply before streaming; a failed receive ends the session
    Require,
}

/// Resource handling once a session reaches a terminal result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TerminalPolicy {
    /// Stop the producers this session started and close the connection
    #[default]
    Teardown,

    /// Keep both until `stop()` or the next `start`
    Linger,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_receive_buffer_size() -> usize {
    4096
}

fn default_ranging_poll_interval() -> u64 {
    20 // 50 Hz
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let contents = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Options for the collector connection
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
            framing: self.framing,
            nodelay: self.nodelay,
            receive_buffer_size: self.receive_buffer_size,
        }
    }

    pub fn ranging_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ranging_poll_interval_ms.max(1))
    }
}
