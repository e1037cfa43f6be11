//! Error types for the voice link

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

use crate::session::SessionState;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Invalid call request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Session is {0}")]
    InvalidState(SessionState),
}

/// Audio device errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(usize),

    #[error("No default {0} device")]
    NoDefault(&'static str),

    #[error("Unsupported stream configuration: {0}")]
    Unsupported(String),

    #[error("Failed to open stream: {0}")]
    OpenFailed(String),

    #[error("Stream failed: {0}")]
    StreamFailed(String),

    #[error("Device stopped delivering audio")]
    Timeout,

    #[error("Stream closed")]
    Closed,
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Port {port} unavailable: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Socket setup failed: {0}")]
    Socket(#[source] io::Error),

    #[error("Peer already set to {0}")]
    PeerAlreadySet(SocketAddr),

    #[error("Transport already running")]
    AlreadyRunning,

    #[error("Socket failure: {0}")]
    Runtime(#[source] io::Error),
}

impl NetworkError {
    /// Port of a bind failure, if this is one
    pub fn bind_port(&self) -> Option<u16> {
        match self {
            NetworkError::Bind { port, .. } => Some(*port),
            _ => None,
        }
    }
}

/// Call request validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Port must be between 1024 and 65535, got {0}")]
    PortOutOfRange(u32),

    #[error("Peer IP address cannot be empty")]
    EmptyPeerAddress,

    #[error("Cannot resolve peer address: {0}")]
    UnresolvablePeer(String),
}

/// Configuration file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Cannot write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
