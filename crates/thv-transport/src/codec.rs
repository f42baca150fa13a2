//! Newline-delimited JSON framing.
//!
//! One message is one line. The decoder yields `Result<Frame, FrameError>`
//! items so that an oversized or malformed line is reported and skipped
//! without ending the stream; only I/O failures end it.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use thv_core::{FrameError, MAX_FRAME_BYTES};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// One JSON-RPC message (object or batch array).
///
/// The original bytes are kept so a frame is relayed exactly as it was
/// produced; the parsed value is only used for routing.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    raw: Bytes,
    value: Value,
}

impl Frame {
    /// Parse a single message, keeping `raw` verbatim.
    pub fn parse(raw: Bytes) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_slice(&raw).map_err(|e| FrameError::Malformed(e.to_string()))?;
        if !(value.is_object() || value.is_array()) {
            return Err(FrameError::Malformed(
                "expected a JSON object or array".to_string(),
            ));
        }
        Ok(Self { raw, value })
    }

    /// Parse a message submitted by a client, guaranteeing it fits on one line.
    ///
    /// Bodies that contain line breaks (pretty-printed JSON) have their
    /// insignificant whitespace removed; key order and number text are kept.
    /// Anything else is kept verbatim.
    pub fn parse_single_line(raw: Bytes) -> Result<Self, FrameError> {
        let frame = Self::parse(raw)?;
        if !frame.raw.iter().any(|b| *b == b'\n' || *b == b'\r') {
            return Ok(frame);
        }
        Ok(Self {
            raw: Bytes::from(strip_whitespace(&frame.raw)),
            value: frame.value,
        })
    }

    pub const fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Frame text for an SSE `data` field.
    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }

    pub fn into_raw(self) -> Bytes {
        self.raw
    }
}

/// Drop whitespace outside string literals from valid JSON text.
///
/// Valid JSON cannot hold a raw line break inside a string, so the result
/// is always a single line.
fn strip_whitespace(json: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;
    for &b in json {
        if in_string {
            out.push(b);
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b' ' | b'\t' | b'\n' | b'\r' => {}
            b'"' => {
                in_string = true;
                out.push(b);
            }
            _ => out.push(b),
        }
    }
    out
}

/// Decoder/encoder for newline-delimited JSON messages.
#[derive(Debug)]
pub struct JsonLineCodec {
    max_length: usize,
    /// Offset already scanned for a newline.
    next_index: usize,
    /// Dropping the tail of an oversized line.
    discarding: bool,
}

impl JsonLineCodec {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_max_length(MAX_FRAME_BYTES)
    }

    #[must_use]
    pub const fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    fn oversized(&self) -> FrameError {
        FrameError::Oversized {
            limit: self.max_length,
        }
    }

    /// Turn one complete line (terminator removed) into an item, `None` for blank lines.
    fn line_to_item(&self, mut line: Bytes) -> Option<Result<Frame, FrameError>> {
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        if line.len() > self.max_length {
            return Some(Err(self.oversized()));
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        trace!(len = line.len(), "Decoded line");
        Some(Frame::parse(line))
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonLineCodec {
    type Item = Result<Frame, FrameError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            let Some(pos) = newline else {
                if self.discarding {
                    src.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                if src.len() > self.max_length {
                    // Report now; the rest of the line is dropped as it arrives.
                    src.clear();
                    self.next_index = 0;
                    self.discarding = true;
                    return Ok(Some(Err(self.oversized())));
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let mut line = src.split_to(pos + 1).freeze();
            line.truncate(pos);
            self.next_index = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if let Some(item) = self.line_to_item(line) {
                return Ok(Some(item));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            src.clear();
            return Ok(None);
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Final line without a terminator.
        let line = src.split().freeze();
        Ok(self.line_to_item(line))
    }
}

impl Encoder<Frame> for JsonLineCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> io::Result<()> {
        let raw = frame.into_raw();
        dst.reserve(raw.len() + 1);
        dst.put(raw);
        dst.put_u8(b'\n');
        Ok(())
    }
}
