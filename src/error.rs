//! Error types for the relay sessions

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crypto codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Tag mismatch: wrong key or tampered frame
    #[error("Authentication failed")]
    AuthFailure,

    #[error("Frame truncated: {0} bytes")]
    Truncated(usize),

    #[error("Random source unavailable: {0}")]
    RandomUnavailable(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Invalid key length: {0}")]
    InvalidKey(usize),
}

impl CryptoError {
    /// True for errors that mean "this inbound frame is not trustworthy".
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, CryptoError::AuthFailure | CryptoError::Truncated(_))
    }
}

/// Connection open errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnError {
    #[error("Connection already open or opening")]
    AlreadyOpen,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Transport failed: {0}")]
    Transport(String),

    #[error("Key unavailable: {0}")]
    Key(String),
}

/// Outbound send errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Not connected")]
    NotConnected,
}

/// Audio hardware-boundary errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Playback failed: {0}")]
    Playback(String),
}

/// Telemetry pipeline errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    /// Malformed inbound payload
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Decode error: {0}")]
    Decode(#[from] CryptoError),

    #[error("Position source error: {0}")]
    Source(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
