//! Server-Sent Events frame codec.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] and folds its lines into
//! [`Event`]s. Frames are separated by a blank line; within a frame:
//!
//! | Line prefix | Effect                                              |
//! |-------------|-----------------------------------------------------|
//! | `event:`    | sets the event kind (value trimmed)                 |
//! | `data:`     | appended to the payload without separator (trimmed) |
//! | `:`         | comment / keep-alive, ignored                       |
//! | *(other)*   | ignored (`id:`, `retry:`, …)                        |
//!
//! A frame is emitted only when it has both a kind and a non-empty payload.
//! Bytes that do not yet form a complete line stay in the read buffer, so the
//! decoded sequence does not depend on how the transport chunks the stream.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use readium_probe::sse::codec::SseCodec;
//!
//! let frames = FramedRead::new(body_reader, SseCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Maximum length of a single stream line: 8 MiB.
///
/// Longer lines are discarded up to the next newline and the frame they
/// belonged to is dropped.
pub const MAX_LINE_BYTES: usize = 8 * 1_048_576;

/// Event kind announcing the side-channel endpoint and session id.
pub const ENDPOINT_EVENT: &str = "endpoint";

/// Event kind carrying one JSON-RPC message.
pub const MESSAGE_EVENT: &str = "message";

/// One decoded stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Value of the frame's `event:` line.
    pub kind: String,
    /// Concatenated `data:` values.
    pub payload: String,
}

impl Event {
    /// Build an event from its parts.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// Whether this is the handshake announcement.
    #[must_use]
    pub fn is_endpoint(&self) -> bool {
        self.kind == ENDPOINT_EVENT
    }

    /// Whether this carries a protocol message.
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.kind == MESSAGE_EVENT
    }
}

/// Decoder turning an SSE byte stream into [`Event`]s.
///
/// Never returns an error for malformed input: oversized or non-UTF-8 lines
/// are logged at `WARN` and the current frame is abandoned.
#[derive(Debug)]
pub struct SseCodec {
    lines: LinesCodec,
    max_line: usize,
    kind: Option<String>,
    payload: String,
}

impl SseCodec {
    /// Create a new `SseCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom per-line limit.
    #[must_use]
    pub fn with_max_line_length(max: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max),
            max_line: max,
            kind: None,
            payload: String::new(),
        }
    }

    /// Whether a frame has been started but not yet terminated.
    #[must_use]
    pub fn has_partial_frame(&self) -> bool {
        self.kind.is_some() || !self.payload.is_empty()
    }

    fn feed_line(&mut self, line: &str) -> Option<Event> {
        if line.is_empty() {
            return self.finish_frame();
        }

        if let Some(value) = line.strip_prefix("event:") {
            let value = value.trim();
            self.kind = (!value.is_empty()).then(|| value.to_owned());
        } else if let Some(value) = line.strip_prefix("data:") {
            self.payload.push_str(value.trim());
        }
        // Comments (`:`) and other fields fall through.

        None
    }

    fn finish_frame(&mut self) -> Option<Event> {
        let kind = self.kind.take();
        let payload = std::mem::take(&mut self.payload);
        match kind {
            Some(kind) if !payload.is_empty() => Some(Event { kind, payload }),
            _ => None,
        }
    }

    fn reset(&mut self) {
        self.kind = None;
        self.payload.clear();
    }

    /// Apply one `LinesCodec` result; `None` means "keep reading".
    fn absorb(
        &mut self,
        line: std::result::Result<String, LinesCodecError>,
    ) -> Option<Event> {
        match line {
            Ok(line) => self.feed_line(&line),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!(
                    max = self.max_line,
                    "sse codec: line too long, dropping current frame"
                );
                self.reset();
                None
            }
            Err(LinesCodecError::Io(err)) => {
                // LinesCodec only surfaces invalid UTF-8 here; the line is
                // already consumed from the buffer.
                warn!(error = %err, "sse codec: undecodable line, dropping current frame");
                self.reset();
                None
            }
        }
    }
}

impl Default for SseCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SseCodec {
    type Item = Event;
    type Error = AppError;

    /// Decode the next complete frame from `src`.
    ///
    /// Returns `Ok(None)` when `src` holds no complete frame yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(line) = self.lines.decode(src).transpose() else {
                return Ok(None);
            };
            if let Some(event) = self.absorb(line) {
                return Ok(Some(event));
            }
        }
    }

    /// Drain complete frames at end of stream; an unterminated frame is discarded.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(line) = self.lines.decode_eof(src).transpose() else {
                if self.has_partial_frame() {
                    debug!("sse codec: discarding unterminated frame at end of stream");
                    self.reset();
                }
                return Ok(None);
            };
            if let Some(event) = self.absorb(line) {
                return Ok(Some(event));
            }
        }
    }
}
