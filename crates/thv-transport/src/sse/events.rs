//! Event-stream framing for relayed `text/event-stream` bodies.
//!
//! Upstream chunks can split an event anywhere. The framer only releases
//! bytes up to the last complete event (terminated by a blank line) and
//! holds the remainder until the rest arrives.

use std::io;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Stream, StreamExt};
use tracing::debug;

#[derive(Debug, Default)]
pub struct EventFramer {
    buf: BytesMut,
    /// Bytes already searched for a boundary.
    scanned: usize,
}

impl EventFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk; returns every event completed by it, concatenated.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Bytes> {
        self.buf.extend_from_slice(chunk);
        let end = self.last_boundary()?;
        self.scanned = 0;
        Some(self.buf.split_to(end).freeze())
    }

    /// Bytes of an event that never completed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// End of the last `\n\n` / `\r\n\r\n` (or mixed) boundary in the buffer.
    fn last_boundary(&mut self) -> Option<usize> {
        // Step back so a terminator split across chunks is still found.
        let start = self.scanned.saturating_sub(2);
        let mut end = None;
        for i in start.max(1)..self.buf.len() {
            if self.buf[i] != b'\n' {
                continue;
            }
            let prev = self.buf[i - 1];
            if prev == b'\n' || (prev == b'\r' && i >= 2 && self.buf[i - 2] == b'\n') {
                end = Some(i + 1);
            }
        }
        self.scanned = self.buf.len();
        end
    }
}

/// Re-chunk an upstream byte stream so each item holds only whole events.
pub fn frame_events<S, E>(upstream: S) -> impl Stream<Item = Result<Bytes, io::Error>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    stream::unfold(
        (Box::pin(upstream), EventFramer::new()),
        |(mut upstream, mut framer)| async move {
            loop {
                match upstream.next().await {
                    Some(Ok(chunk)) => {
                        if let Some(events) = framer.push(&chunk) {
                            return Some((Ok(events), (upstream, framer)));
                        }
                    }
                    Some(Err(e)) => {
                        return Some((Err(io::Error::other(e)), (upstream, framer)));
                    }
                    None => {
                        if framer.pending() > 0 {
                            debug!(bytes = framer.pending(), "Dropping incomplete trailing event");
                        }
                        return None;
                    }
                }
            }
        },
    )
}
