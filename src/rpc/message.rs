//! JSON-RPC 2.0 message envelope exchanged over the stream and side channel.
//!
//! A [`Message`] is exactly one of:
//!
//! | Shape         | Populated fields            |
//! |---------------|-----------------------------|
//! | request       | `id`, `method`, `params`    |
//! | notification  | `method`, `params`          |
//! | result reply  | `id`, `result`              |
//! | error reply   | `id`, `error`               |
//!
//! [`Message::decode`] enforces that shape; serde alone does not.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Protocol version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation id linking a request to its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Numeric id; the client assigns these sequentially.
    Number(u64),
    /// String id, accepted from servers that use them.
    Text(String),
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Display for RpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Classification of a decoded [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Carries `method` and an `id`.
    Request,
    /// Carries `method` but no `id`.
    Notification,
    /// Successful reply.
    Result,
    /// Failed reply.
    Error,
}

/// A structured request, reply, or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Always `"2.0"` for messages built by this crate.
    pub jsonrpc: String,
    /// Correlation id; absent on notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Method name for requests and notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Reply payload; `null` is a legitimate result and is kept as `Some(Null)`.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    /// Reply error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Message {
    /// Build a request expecting a reply correlated on `id`.
    #[must_use]
    pub fn request(id: impl Into<MessageId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: Some(id.into()),
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    /// Build a notification (no reply expected).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            ..Self::request(0, method, params)
        }
    }

    /// Build a successful reply.
    #[must_use]
    pub fn result(id: impl Into<MessageId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: Some(id.into()),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error reply.
    #[must_use]
    pub fn error(id: impl Into<MessageId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: Some(id.into()),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    /// Decode a message event payload and check its shape.
    ///
    /// # Errors
    ///
    /// - [`AppError::Decode`]`("malformed json: …")`: not a JSON message object.
    /// - [`AppError::Decode`]`("invalid message shape: …")`: not exactly one of
    ///   `method`, `result`, `error`; or `params` without `method`.
    pub fn decode(payload: &str) -> Result<Self> {
        let message: Self = serde_json::from_str(payload)
            .map_err(|e| AppError::Decode(format!("malformed json: {e}")))?;
        message.check_shape()?;
        Ok(message)
    }

    /// Serialise to a compact JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if serialisation fails.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Protocol(format!("failed to serialise message: {e}")))
    }

    /// Which of the four shapes this message has.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        if self.error.is_some() {
            MessageKind::Error
        } else if self.result.is_some() {
            MessageKind::Result
        } else if self.id.is_some() {
            MessageKind::Request
        } else {
            MessageKind::Notification
        }
    }

    /// Whether this answers an earlier request.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        matches!(self.kind(), MessageKind::Result | MessageKind::Error)
    }

    /// Method name, or `""` for replies.
    #[must_use]
    pub fn method_name(&self) -> &str {
        self.method.as_deref().unwrap_or("")
    }

    fn check_shape(&self) -> Result<()> {
        let populated = [
            self.method.is_some(),
            self.result.is_some(),
            self.error.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count();

        if populated != 1 {
            return Err(AppError::Decode(format!(
                "invalid message shape: expected exactly one of method, result or error, found \
                 {populated}"
            )));
        }

        if self.params.is_some() && self.method.is_none() {
            return Err(AppError::Decode(
                "invalid message shape: params without method".into(),
            ));
        }

        Ok(())
    }
}

/// Deserialise a field that is present, keeping an explicit `null`.
fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
