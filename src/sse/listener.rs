//! Event stream listener task.
//!
//! Reads the SSE body through [`FramedRead`] + [`SseCodec`] and routes each
//! [`Event`] in arrival order:
//!
//! | Event kind  | Routed to                                           |
//! |-------------|-----------------------------------------------------|
//! | `endpoint`  | [`HandshakeResolver::offer`]                        |
//! | `message`   | [`Message::decode`] then [`Correlator::deliver`]    |
//! | *(other)*   | Skipped; logged at `DEBUG`                          |
//!
//! Undecodable message payloads are logged and skipped; they never stop the
//! listener.
//!
//! # Termination
//!
//! - Cancellation: the correlator is shut down with
//!   [`CloseReason::Cancelled`], so pending waits resolve immediately.
//! - EOF or I/O error: an unsettled handshake fails with the cause and the
//!   correlator is shut down with [`CloseReason::StreamEnded`].

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rpc::correlator::{CloseReason, Correlator};
use crate::rpc::message::Message;
use crate::session::handshake::HandshakeResolver;
use crate::sse::codec::{Event, SseCodec};
use crate::{AppError, Result};

/// Counters reported when the listener exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Events decoded from the stream.
    pub events: u64,
    /// Message events delivered to the correlator.
    pub messages: u64,
    /// Message events skipped because the payload did not decode.
    pub decode_failures: u64,
}

/// Listener task: drives `stream` until EOF, error, or `cancel`.
///
/// # Errors
///
/// Returns `Ok` in every case; stream failures are reported through the
/// handshake resolver and the correlator's close reason.
pub async fn run_listener<R>(
    stream: R,
    mut resolver: HandshakeResolver,
    correlator: Correlator,
    cancel: CancellationToken,
) -> Result<ListenerStats>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stream, SseCodec::new());
    let mut stats = ListenerStats::default();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("sse listener: cancellation received, stopping");
                resolver.fail(AppError::Cancelled("listener cancelled before handshake".into()));
                correlator.shutdown(CloseReason::Cancelled);
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        info!("sse listener: event stream closed");
                        stream_ended(&mut resolver, &correlator, "event stream closed".into());
                        break;
                    }

                    Some(Err(e)) => {
                        warn!(error = %e, "sse listener: stream error, stopping");
                        stream_ended(
                            &mut resolver,
                            &correlator,
                            format!("event stream failed: {e}"),
                        );
                        break;
                    }

                    Some(Ok(event)) => {
                        stats.events += 1;
                        route_event(&event, &mut resolver, &correlator, &mut stats);
                    }
                }
            }
        }
    }

    debug!(?stats, "sse listener: exiting");
    Ok(stats)
}

fn route_event(
    event: &Event,
    resolver: &mut HandshakeResolver,
    correlator: &Correlator,
    stats: &mut ListenerStats,
) {
    debug!(kind = %event.kind, bytes = event.payload.len(), "sse listener: event");

    if event.is_endpoint() {
        resolver.offer(event);
    } else if event.is_message() {
        match Message::decode(&event.payload) {
            Ok(message) => {
                stats.messages += 1;
                correlator.deliver(message);
            }
            Err(e) => {
                stats.decode_failures += 1;
                warn!(
                    error = %e,
                    raw = %event.payload,
                    "sse listener: undecodable message event, skipping"
                );
            }
        }
    } else {
        debug!(kind = %event.kind, "sse listener: skipping unknown event kind");
    }
}

fn stream_ended(resolver: &mut HandshakeResolver, correlator: &Correlator, cause: String) {
    resolver.fail(AppError::Transport(cause.clone()));
    correlator.shutdown(CloseReason::StreamEnded(cause));
}
