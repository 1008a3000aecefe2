//! Side-channel request dispatch with bounded retry.
//!
//! A dispatch only confirms that the server *queued* the request (`202
//! Accepted`); the reply itself arrives later on the event stream and must be
//! awaited through the [`Correlator`](crate::rpc::correlator::Correlator).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::rpc::message::Message;
use crate::session::handshake::SessionToken;
use crate::{AppError, Result};

/// Status the side channel returns when it has queued a request.
pub const ACCEPTED: u16 = 202;

/// Maximum number of body characters kept in a rejection message.
const BODY_PREVIEW_CHARS: usize = 200;

/// Immediate transport answer to a POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// HTTP status code.
    pub status: u16,
    /// Response body, usually empty on success.
    pub body: String,
}

impl Ack {
    /// Whether the server queued the request.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status == ACCEPTED
    }
}

/// The request-sending half of the connection.
///
/// Implemented over HTTP by [`HttpSideChannel`]; tests substitute scripted
/// implementations.
pub trait SideChannel: Send + Sync {
    /// POST one message to the endpoint scoped to `session`.
    ///
    /// Returns the status for any HTTP answer; only failures to reach the
    /// server are errors.
    fn post<'a>(
        &'a self,
        session: &'a SessionToken,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = Result<Ack>> + Send + 'a>>;
}

/// [`SideChannel`] backed by `reqwest`.
pub struct HttpSideChannel {
    client: Client,
    config: Arc<ClientConfig>,
}

impl HttpSideChannel {
    /// Create a side channel posting to `config.messages_path`.
    #[must_use]
    pub fn new(client: Client, config: Arc<ClientConfig>) -> Self {
        Self { client, config }
    }
}

impl SideChannel for HttpSideChannel {
    fn post<'a>(
        &'a self,
        session: &'a SessionToken,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = Result<Ack>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.config.messages_url(&session.id)?;
            let response = self
                .client
                .post(url)
                .timeout(self.config.request_timeout())
                .json(message)
                .send()
                .await
                .map_err(|e| {
                    AppError::Transport(format!(
                        "POST {} failed: {e}",
                        message.method_name()
                    ))
                })?;

            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Ok(Ack { status, body })
        })
    }
}

/// Fixed-count retry with a constant pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first; at least one is always made.
    pub max_attempts: u32,
    /// Pause after each rejected attempt except the last.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Policy taken from the `[dispatch]` configuration table.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.dispatch.max_attempts,
            backoff: config.dispatch_backoff(),
        }
    }
}

/// Sends requests over a [`SideChannel`] under a [`RetryPolicy`].
#[derive(Clone)]
pub struct Dispatcher {
    channel: Arc<dyn SideChannel>,
    policy: RetryPolicy,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(channel: Arc<dyn SideChannel>, policy: RetryPolicy) -> Self {
        Self { channel, policy }
    }

    /// Send `message` and wait for the accepted acknowledgement.
    ///
    /// Retries if and only if the status is not [`ACCEPTED`], sleeping
    /// `policy.backoff` between attempts.
    ///
    /// # Errors
    ///
    /// - [`AppError::DispatchRejected`]: every attempt was answered with a
    ///   non-accepted status; carries the final status and body.
    /// - [`AppError::Transport`]: the server could not be reached; not retried.
    pub async fn send(&self, message: &Message, session: &SessionToken) -> Result<Ack> {
        let method = message.method_name();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(method, id = ?message.id, attempt, max_attempts, "dispatch: posting");

            let ack = self.channel.post(session, message).await?;
            if ack.is_accepted() {
                info!(method, id = ?message.id, attempt, "dispatch: accepted");
                return Ok(ack);
            }

            warn!(
                method,
                status = ack.status,
                attempt,
                max_attempts,
                body = %preview(&ack.body),
                "dispatch: not accepted"
            );

            if attempt >= max_attempts {
                return Err(AppError::DispatchRejected(format!(
                    "{method} answered {} after {attempt} attempt(s): {}",
                    describe_status(ack.status),
                    preview(&ack.body)
                )));
            }

            tokio::time::sleep(self.policy.backoff).await;
        }
    }
}

fn describe_status(status: u16) -> String {
    match StatusCode::from_u16(status) {
        Ok(code) => code.to_string(),
        Err(_) => status.to_string(),
    }
}

fn preview(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > BODY_PREVIEW_CHARS {
        let head: String = trimmed.chars().take(BODY_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        trimmed.to_owned()
    }
}
