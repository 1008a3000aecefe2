//! One-shot resolution of the session identifier.
//!
//! The server opens every event stream with an `endpoint` event whose payload
//! is the side-channel URL, e.g. `/messages/?session_id=9f1c…`. The listener
//! feeds events to a [`HandshakeResolver`]; the supervisor waits on the paired
//! [`HandshakeWaiter`] with its own timeout.
//!
//! - The first matching `endpoint` event resolves the pair; later ones are
//!   ignored.
//! - If the stream ends first, the waiter fails with the stream's cause.
//! - A timeout is reported as [`AppError::HandshakeTimeout`], never as a
//!   transport failure.

use std::time::Duration;

use regex::Regex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::sse::codec::Event;
use crate::{AppError, Result};

/// Pattern locating the session identifier inside the endpoint payload.
const SESSION_ID_PATTERN: &str = r"session_id=([a-f0-9]+)";

/// Session identifier scoping side-channel requests to one stream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// Opaque hex identifier issued by the server.
    pub id: String,
}

/// Create a connected resolver/waiter pair for one connection attempt.
///
/// # Errors
///
/// Returns `AppError::Config` if the session-id pattern fails to compile.
pub fn channel() -> Result<(HandshakeResolver, HandshakeWaiter)> {
    let pattern = Regex::new(SESSION_ID_PATTERN)
        .map_err(|e| AppError::Config(format!("invalid session id pattern: {e}")))?;
    let (tx, rx) = oneshot::channel();
    Ok((
        HandshakeResolver {
            pattern,
            tx: Some(tx),
        },
        HandshakeWaiter { rx },
    ))
}

/// Stream-side half: inspects events and settles the handshake once.
#[derive(Debug)]
pub struct HandshakeResolver {
    pattern: Regex,
    tx: Option<oneshot::Sender<Result<SessionToken>>>,
}

impl HandshakeResolver {
    /// Offer an event; returns `true` only for the event that resolved the handshake.
    pub fn offer(&mut self, event: &Event) -> bool {
        if !event.is_endpoint() {
            return false;
        }

        if self.tx.is_none() {
            debug!(payload = %event.payload, "handshake: already resolved, ignoring endpoint event");
            return false;
        }

        let Some(id) = self.extract_session_id(&event.payload) else {
            warn!(payload = %event.payload, "handshake: endpoint event without session id");
            return false;
        };

        if let Some(tx) = self.tx.take() {
            info!(session_id = %id, "handshake: session id received");
            if tx.send(Ok(SessionToken { id })).is_err() {
                debug!("handshake: waiter already gone");
            }
        }
        true
    }

    /// Settle the handshake with a failure, unless it already resolved.
    pub fn fail(&mut self, cause: AppError) {
        if let Some(tx) = self.tx.take() {
            warn!(error = %cause, "handshake: failed before session id arrived");
            if tx.send(Err(cause)).is_err() {
                debug!("handshake: waiter already gone");
            }
        }
    }

    /// Extract the session identifier from an endpoint payload.
    #[must_use]
    pub fn extract_session_id(&self, payload: &str) -> Option<String> {
        self.pattern
            .captures(payload)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_owned())
    }
}

/// Caller-side half: waits for the session token.
#[derive(Debug)]
pub struct HandshakeWaiter {
    rx: oneshot::Receiver<Result<SessionToken>>,
}

impl HandshakeWaiter {
    /// Wait up to `timeout` for the handshake.
    ///
    /// # Errors
    ///
    /// - [`AppError::HandshakeTimeout`]: nothing resolved within `timeout`.
    /// - [`AppError::Transport`]: the stream ended before a handshake event;
    ///   carries the underlying cause when the listener reported one.
    pub async fn wait(self, timeout: Duration) -> Result<SessionToken> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AppError::Transport(
                "event stream closed before the endpoint event".into(),
            )),
            Err(_) => Err(AppError::HandshakeTimeout(format!(
                "no endpoint event within {timeout:?}"
            ))),
        }
    }
}
