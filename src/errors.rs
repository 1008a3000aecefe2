//! Error types shared across the client.

use std::fmt::{Display, Formatter};

/// Shared client result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Client error enumeration covering every failure a session can report.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Event stream or side channel could not be reached, or dropped mid-flight.
    Transport(String),
    /// No handshake event arrived within the handshake timeout.
    HandshakeTimeout(String),
    /// Side channel kept answering with a non-accepted status until retries ran out.
    DispatchRejected(String),
    /// A message event payload could not be decoded.
    Decode(String),
    /// A correlated reply did not arrive within its timeout.
    CorrelationTimeout(String),
    /// The liveness precheck failed.
    HealthCheckFailed(String),
    /// A wait was abandoned because the listener stopped.
    Cancelled(String),
    /// The server answered a request with a JSON-RPC error object.
    Rpc(String),
    /// Local protocol misuse or an unexpected reply shape.
    Protocol(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::HandshakeTimeout(msg) => write!(f, "handshake timeout: {msg}"),
            Self::DispatchRejected(msg) => write!(f, "dispatch rejected: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::CorrelationTimeout(msg) => write!(f, "correlation timeout: {msg}"),
            Self::HealthCheckFailed(msg) => write!(f, "health check failed: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Rpc(msg) => write!(f, "rpc: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
