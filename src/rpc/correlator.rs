//! Routes decoded replies to the callers awaiting them.
//!
//! The [`Correlator`] is shared between the stream listener (which calls
//! [`Correlator::deliver`]) and the session supervisor (which registers
//! interest and waits). Replies whose id has a registered waiter go to that
//! waiter's `oneshot`; every other message lands in a single ordered queue
//! drained with [`Correlator::next_message`].
//!
//! Register with [`Correlator::expect`] *before* dispatching the request:
//! a reply that arrives while no waiter is registered goes to the queue.
//!
//! Once [`Correlator::shutdown`] runs, every outstanding waiter resolves with
//! the shutdown reason instead of hanging until its timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rpc::message::{Message, MessageId};
use crate::{AppError, Result};

/// Why the correlator stopped accepting waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The listener was cancelled by its owner.
    Cancelled,
    /// The event stream ended or failed.
    StreamEnded(String),
}

impl CloseReason {
    fn to_error(&self) -> AppError {
        match self {
            Self::Cancelled => AppError::Cancelled("event stream listener stopped".into()),
            Self::StreamEnded(cause) => AppError::Transport(cause.clone()),
        }
    }
}

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<Message>,
}

#[derive(Default)]
struct State {
    pending: HashMap<MessageId, Waiter>,
    next_ticket: u64,
    closed: Option<CloseReason>,
}

struct Inner {
    state: Mutex<State>,
    queue_tx: mpsc::UnboundedSender<Message>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
    closed: CancellationToken,
}

/// Pending-correlation map plus the general message queue for one connection.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Correlator {
    inner: Arc<Inner>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                queue_tx,
                queue_rx: tokio::sync::Mutex::new(queue_rx),
                closed: CancellationToken::new(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in the reply to `id`.
    ///
    /// # Errors
    ///
    /// - [`AppError::Protocol`]: another waiter is already registered for `id`.
    /// - [`AppError::Cancelled`] / [`AppError::Transport`]: the correlator
    ///   has been shut down.
    pub fn expect(&self, id: impl Into<MessageId>) -> Result<PendingReply> {
        let id = id.into();
        let mut state = self.state();

        if let Some(reason) = &state.closed {
            return Err(reason.to_error());
        }

        if state.pending.contains_key(&id) {
            warn!(%id, "correlator: rejecting second waiter for the same id");
            return Err(AppError::Protocol(format!(
                "a waiter is already registered for id {id}"
            )));
        }

        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let (tx, rx) = oneshot::channel();
        state.pending.insert(id.clone(), Waiter { ticket, tx });
        debug!(%id, pending = state.pending.len(), "correlator: registered waiter");

        Ok(PendingReply {
            id,
            ticket,
            rx,
            correlator: self.clone(),
        })
    }

    /// Route one decoded message.
    ///
    /// A reply with a registered id goes to that waiter; everything else
    /// is appended to the general queue. Messages arriving after shutdown
    /// are dropped.
    pub fn deliver(&self, message: Message) {
        let waiter = {
            let mut state = self.state();
            if state.closed.is_some() {
                debug!(id = ?message.id, "correlator: closed, dropping message");
                return;
            }
            match (&message.id, message.is_reply()) {
                (Some(id), true) => state.pending.remove(id),
                _ => None,
            }
        };

        let message = match waiter {
            Some(waiter) => match waiter.tx.send(message) {
                Ok(()) => return,
                Err(message) => {
                    debug!(id = ?message.id, "correlator: waiter gone, queueing reply");
                    message
                }
            },
            None => message,
        };

        debug!(
            id = ?message.id,
            method = message.method_name(),
            "correlator: queueing uncorrelated message"
        );
        // The receiver lives in `inner`, so the queue outlives every sender.
        let _ = self.inner.queue_tx.send(message);
    }

    /// Wait for the next message in the general queue (drain mode).
    ///
    /// Queued messages are still returned after shutdown; once the queue is
    /// empty a closed correlator resolves with the shutdown reason.
    ///
    /// # Errors
    ///
    /// - [`AppError::CorrelationTimeout`]: nothing arrived within `timeout`.
    /// - [`AppError::Cancelled`] / [`AppError::Transport`]: shut down and empty.
    pub async fn next_message(&self, timeout: Duration) -> Result<Message> {
        let mut rx = self.inner.queue_rx.lock().await;
        let closed = self.inner.closed.clone();

        let outcome = tokio::time::timeout(timeout, async {
            tokio::select! {
                biased;
                message = rx.recv() => message,
                () = closed.cancelled() => rx.try_recv().ok(),
            }
        })
        .await;

        match outcome {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(self.close_error()),
            Err(_) => Err(AppError::CorrelationTimeout(format!(
                "no message within {timeout:?}"
            ))),
        }
    }

    /// Take every message currently in the general queue without waiting.
    pub async fn drain(&self) -> Vec<Message> {
        let mut rx = self.inner.queue_rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(message) = rx.try_recv() {
            drained.push(message);
        }
        drained
    }

    /// Stop routing: fail every pending waiter and refuse new ones.
    ///
    /// Idempotent; the first reason wins.
    pub fn shutdown(&self, reason: CloseReason) {
        let abandoned = {
            let mut state = self.state();
            if state.closed.is_some() {
                return;
            }
            debug!(?reason, pending = state.pending.len(), "correlator: shutting down");
            state.closed = Some(reason);
            std::mem::take(&mut state.pending)
        };
        // Dropping the senders wakes every waiter.
        drop(abandoned);
        self.inner.closed.cancel();
    }

    /// Whether [`Correlator::shutdown`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed.is_some()
    }

    /// Ids with a registered waiter, for diagnostics.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<MessageId> {
        self.state().pending.keys().cloned().collect()
    }

    fn close_error(&self) -> AppError {
        self.state().closed.as_ref().map_or_else(
            || AppError::Cancelled("correlator closed".into()),
            CloseReason::to_error,
        )
    }

    fn unregister(&self, id: &MessageId, ticket: u64) {
        let mut state = self.state();
        if state
            .pending
            .get(id)
            .is_some_and(|waiter| waiter.ticket == ticket)
        {
            state.pending.remove(id);
        }
    }
}

/// A registered interest in one reply.
///
/// Dropping it (for example after a timeout) removes the registration so a
/// late reply falls through to the general queue.
pub struct PendingReply {
    id: MessageId,
    ticket: u64,
    rx: oneshot::Receiver<Message>,
    correlator: Correlator,
}

impl PendingReply {
    /// The id this waiter is registered for.
    #[must_use]
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Wait for the reply.
    ///
    /// # Errors
    ///
    /// - [`AppError::CorrelationTimeout`]: no reply within `timeout`; other
    ///   waiters are unaffected.
    /// - [`AppError::Cancelled`] / [`AppError::Transport`]: the correlator was
    ///   shut down while waiting.
    pub async fn wait(mut self, timeout: Duration) -> Result<Message> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(self.correlator.close_error()),
            Err(_) => Err(AppError::CorrelationTimeout(format!(
                "no reply to id {} within {timeout:?}",
                self.id
            ))),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.correlator.unregister(&self.id, self.ticket);
    }
}
