//! Error types for the instrumentation layer
//!
//! Every fault here is recovered locally: the instrumented test run must
//! never see one of these. They exist so each layer can log a precise
//! reason and count it before dropping the affected telemetry.
//!
//! ```text
//! PatchError          → hook skipped, original exports handed back
//! ChannelError        → returned from Channel::publish to the producer
//! ExportError         → logged by the writer, batch dropped
//! ConfigError         → Config::from_file / validate
//! CorrelationAnomaly  → logged + counted by the correlator, event ignored
//! ```

/// A patch strategy failed while instrumenting a loaded module
#[derive(Debug, Clone, PartialEq)]
pub struct PatchError {
    pub message: String,
}

impl PatchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Patch failed: {}", self.message)
    }
}

impl std::error::Error for PatchError {}

/// A subscriber rejected a payload published on a channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelError {
    /// Channel the payload was published on (filled in by the channel)
    pub channel: String,
    pub message: String,
}

impl ChannelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            channel: String::new(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Subscriber of '{}' failed: {}", self.channel, self.message)
    }
}

impl std::error::Error for ChannelError {}

/// Error type for batch encoding and delivery
#[derive(Debug)]
pub enum ExportError {
    /// MessagePack encoding failed
    Encode(String),
    /// MessagePack decoding failed
    Decode(String),
    /// Network, DNS or timeout failure talking to the intake
    Transport(String),
    /// The intake answered with a non-success status
    Status(u16),
    /// The background writer task is gone
    Closed,
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Encode(msg) => write!(f, "Encode error: {}", msg),
            ExportError::Decode(msg) => write!(f, "Decode error: {}", msg),
            ExportError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ExportError::Status(code) => write!(f, "Intake responded with status {}", code),
            ExportError::Closed => write!(f, "Writer is closed"),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<rmp_serde::encode::Error> for ExportError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ExportError::Encode(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ExportError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ExportError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for ExportError {
    fn from(e: reqwest::Error) -> Self {
        ExportError::Transport(e.to_string())
    }
}

/// Error type for configuration loading
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// An event arrived that does not fit the correlator's current state
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationAnomaly {
    /// Event that triggered the anomaly (e.g. "test:finish")
    pub event: &'static str,
    pub reason: String,
}

impl CorrelationAnomaly {
    pub fn new(event: &'static str, reason: impl Into<String>) -> Self {
        Self {
            event,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for CorrelationAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ignoring '{}': {}", self.event, self.reason)
    }
}

impl std::error::Error for CorrelationAnomaly {}
