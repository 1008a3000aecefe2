//! Session supervisor: owns one connection from precheck to teardown.
//!
//! State machine:
//!
//! ```text
//! Idle ──precheck──▶ Connecting ──stream open──▶ HandshakeWait ──token──▶ Ready
//!   │                    │                            │                    │
//!   └────────────────────┴──────────── Failed ◀───────┴────────────────────┤
//!                                                                          ▼
//!                                                         Closing ──▶ Closed
//! ```
//!
//! In `Ready` the fixed sequence runs strictly in order:
//!
//! 1. dispatch `initialize` and require the accepted ack;
//! 2. dispatch `tools/list` and await its correlated reply (`T_list`);
//! 3. if the configured tool is listed, dispatch `call_tool` and await its
//!    reply (`T_invoke`).
//!
//! `T_handshake` covers both opening the stream and receiving the endpoint
//! event. Once the stream is open, teardown (cancel the listener, shut the
//! correlator, join the task) runs on every exit path.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::rpc::correlator::{CloseReason, Correlator};
use crate::rpc::dispatcher::{Dispatcher, HttpSideChannel, RetryPolicy, SideChannel};
use crate::rpc::message::Message;
use crate::rpc::methods::{self, ToolInfo, ToolOutput};
use crate::session::handshake::{self, HandshakeWaiter, SessionToken};
use crate::session::health::check_health;
use crate::sse::listener::{run_listener, ListenerStats};
use crate::{AppError, Result};

/// Response body of the event stream as an `AsyncRead`.
type EventBody = StreamReader<Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>, Bytes>;

/// Upper bound on waiting for the listener task to exit after cancellation.
const LISTENER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started; the precheck runs here.
    Idle,
    /// Opening the event stream.
    Connecting,
    /// Stream open, waiting for the endpoint event.
    HandshakeWait,
    /// Session id known; running the protocol sequence.
    Ready,
    /// Sequence finished; releasing resources.
    Closing,
    /// Released.
    Closed,
    /// Terminal failure.
    Failed,
}

/// Result of the `call_tool` step.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Invoked tool name.
    pub tool: String,
    /// Raw correlated reply.
    pub reply: Message,
    /// Decoded tool output.
    pub output: ToolOutput,
}

/// Everything a successful session learned.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Session the requests were scoped to.
    pub session: SessionToken,
    /// Capabilities listed by the server.
    pub tools: Vec<ToolInfo>,
    /// Present when the configured tool was offered.
    pub invocation: Option<Invocation>,
    /// Messages no waiter claimed (the `initialize` reply, notifications, …).
    pub unsolicited: Vec<Message>,
}

/// Drives one session against the configured server.
pub struct SessionSupervisor {
    config: Arc<ClientConfig>,
    client: Client,
    dispatcher: Dispatcher,
    state: ConnectionState,
    history: Vec<ConnectionState>,
    next_id: u64,
    torn_down: bool,
}

impl SessionSupervisor {
    /// Create a supervisor talking HTTP to `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if validation fails or the HTTP client
    /// cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Config(format!("failed to build http client: {e}")))?;
        let channel = Arc::new(HttpSideChannel::new(client.clone(), Arc::clone(&config)));
        Ok(Self::with_side_channel(config, client, channel))
    }

    /// Create a supervisor with a caller-supplied side channel.
    #[must_use]
    pub fn with_side_channel(
        config: Arc<ClientConfig>,
        client: Client,
        channel: Arc<dyn SideChannel>,
    ) -> Self {
        let dispatcher = Dispatcher::new(channel, RetryPolicy::from_config(&config));
        Self {
            config,
            client,
            dispatcher,
            state: ConnectionState::Idle,
            history: vec![ConnectionState::Idle],
            next_id: 1,
            torn_down: false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Every state visited, in order.
    #[must_use]
    pub fn history(&self) -> &[ConnectionState] {
        &self.history
    }

    /// Whether the listener has been cancelled and joined.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Run the whole session.
    ///
    /// # Errors
    ///
    /// Returns the originating failure; the supervisor is then in
    /// [`ConnectionState::Failed`].
    pub async fn run(&mut self) -> Result<SessionOutcome> {
        let result = self.connect_and_drive().await;
        if let Err(err) = &result {
            self.fail(err);
        }
        result
    }

    async fn connect_and_drive(&mut self) -> Result<SessionOutcome> {
        let health_url = self.config.health_url()?;
        if !check_health(&self.client, &health_url, self.config.health_timeout()).await {
            return Err(AppError::HealthCheckFailed(format!(
                "{health_url} is unreachable or unhealthy"
            )));
        }

        self.transition(ConnectionState::Connecting);
        let (resolver, waiter) = handshake::channel()?;
        let handshake_timeout = self.config.handshake_timeout();
        let deadline = Instant::now() + handshake_timeout;
        let body = tokio::time::timeout_at(deadline, self.open_stream())
            .await
            .map_err(|_| {
                AppError::HandshakeTimeout(format!(
                    "event stream did not open within {handshake_timeout:?}"
                ))
            })??;

        let correlator = Correlator::new();
        let cancel = CancellationToken::new();
        let listener = tokio::spawn(run_listener(
            body,
            resolver,
            correlator.clone(),
            cancel.clone(),
        ));

        let driven = self.drive(waiter, deadline, &correlator).await;
        if let Err(err) = &driven {
            self.fail(err);
        }

        let unsolicited = self.teardown(listener, &cancel, &correlator).await;
        let mut outcome = driven?;
        outcome.unsolicited = unsolicited;
        Ok(outcome)
    }

    async fn open_stream(&self) -> Result<EventBody> {
        let url = self.config.sse_url()?;
        info!(%url, "session: opening event stream");

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("cannot open event stream at {url}: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::Transport(format!("event stream refused: {e}")))?;

        info!("session: event stream established");
        let chunks: Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>> =
            Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        Ok(StreamReader::new(chunks))
    }

    async fn drive(
        &mut self,
        waiter: HandshakeWaiter,
        deadline: Instant,
        correlator: &Correlator,
    ) -> Result<SessionOutcome> {
        self.transition(ConnectionState::HandshakeWait);
        // Opening the stream and the endpoint event share one handshake budget.
        let session = waiter
            .wait(deadline.saturating_duration_since(Instant::now()))
            .await?;
        self.transition(ConnectionState::Ready);

        let settle = self.config.settle_delay();
        if !settle.is_zero() {
            info!(?settle, "session: settling before initialize");
            tokio::time::sleep(settle).await;
        }

        let init = methods::initialize(self.next_id(), &self.config);
        self.dispatcher.send(&init, &session).await?;
        info!(session_id = %session.id, "session: initialize accepted");

        let list = methods::list_tools(self.next_id());
        let reply = self
            .request(&list, &session, correlator, self.config.list_timeout())
            .await?;
        let tools = methods::parse_tool_list(&reply)?;
        info!(count = tools.len(), "session: tools listed");

        let tool_name = self.config.tool.name.clone();
        let invocation = if methods::find_tool(&tools, &tool_name).is_some() {
            let call = methods::call_tool(self.next_id(), &tool_name, &self.config.tool.arguments);
            let reply = self
                .request(&call, &session, correlator, self.config.invoke_timeout())
                .await?;
            let output = methods::parse_tool_output(&reply)?;
            if output.is_error {
                warn!(tool = %tool_name, "session: tool reported an error result");
            } else {
                info!(tool = %tool_name, items = output.content.len(), "session: tool completed");
            }
            Some(Invocation {
                tool: tool_name,
                reply,
                output,
            })
        } else {
            info!(tool = %tool_name, "session: tool not offered, skipping invocation");
            None
        };

        Ok(SessionOutcome {
            session,
            tools,
            invocation,
            unsolicited: Vec::new(),
        })
    }

    /// Register for the reply, dispatch, then wait; in that order.
    async fn request(
        &self,
        message: &Message,
        session: &SessionToken,
        correlator: &Correlator,
        timeout: Duration,
    ) -> Result<Message> {
        let id = message
            .id
            .clone()
            .ok_or_else(|| AppError::Protocol("request without id cannot be awaited".into()))?;
        let pending = correlator.expect(id)?;
        self.dispatcher.send(message, session).await?;
        pending.wait(timeout).await
    }

    async fn teardown(
        &mut self,
        listener: JoinHandle<Result<ListenerStats>>,
        cancel: &CancellationToken,
        correlator: &Correlator,
    ) -> Vec<Message> {
        let succeeded = self.state != ConnectionState::Failed;
        if succeeded {
            self.transition(ConnectionState::Closing);
        }

        let abandoned = correlator.pending_ids();
        if !abandoned.is_empty() {
            debug!(?abandoned, "session: abandoning pending waiters");
        }
        cancel.cancel();
        correlator.shutdown(CloseReason::Cancelled);

        let abort = listener.abort_handle();
        match tokio::time::timeout(LISTENER_JOIN_TIMEOUT, listener).await {
            Ok(Ok(Ok(stats))) => debug!(?stats, "session: listener stopped"),
            Ok(Ok(Err(e))) => warn!(error = %e, "session: listener returned an error"),
            Ok(Err(e)) => warn!(error = %e, "session: listener task failed"),
            Err(_) => {
                warn!(?LISTENER_JOIN_TIMEOUT, "session: listener did not stop, aborting");
                abort.abort();
            }
        }

        let unsolicited = correlator.drain().await;
        for message in &unsolicited {
            debug!(
                id = ?message.id,
                method = message.method_name(),
                "session: unclaimed message"
            );
        }

        self.torn_down = true;
        if succeeded {
            self.transition(ConnectionState::Closed);
        }
        unsolicited
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn transition(&mut self, to: ConnectionState) {
        info!(from = ?self.state, ?to, "session: state change");
        self.state = to;
        self.history.push(to);
    }

    fn fail(&mut self, err: &AppError) {
        if self.state != ConnectionState::Failed {
            error!(from = ?self.state, error = %err, "session: failed");
            self.transition(ConnectionState::Failed);
        }
    }
}
