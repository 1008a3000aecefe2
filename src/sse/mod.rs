//! Server-Sent Events stream handling.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing of
//!   the stream into typed events.
//! - `listener`: the long-running task that owns the stream and routes events
//!   to the handshake resolver and the correlator.

pub mod codec;
pub mod listener;
