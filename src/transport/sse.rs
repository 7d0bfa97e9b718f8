//! Server-sent events channel.

use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tracing::warn;

use crate::error::{PlaygroundResult, TransportError};
use crate::event::StreamEvent;

use super::realtime::{Channel, ChannelKind};

/// Longest line or event payload the decoder buffers before dropping it.
pub const DEFAULT_MAX_EVENT_BYTES: usize = 1 << 20;

/// Incremental `text/event-stream` decoder.
///
/// Only `data:` fields matter here; multi-line data is joined with `\n` and a
/// blank line dispatches the event. Comments and other fields are skipped.
/// A line or event larger than the limit is discarded whole.
#[derive(Debug)]
pub struct SseDecoder {
    pending: Vec<u8>,
    /// Bytes of `pending` already known to hold no newline.
    scanned: usize,
    /// Dropping the rest of an oversized line.
    skipping_line: bool,
    data: Vec<String>,
    data_bytes: usize,
    /// Dropping the rest of an oversized event.
    skipping_event: bool,
    max_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_EVENT_BYTES)
    }
}

impl SseDecoder {
    /// A decoder with the default size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A decoder that drops lines and events longer than `max_bytes`.
    #[must_use]
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            skipping_line: false,
            data: Vec::new(),
            data_bytes: 0,
            skipping_event: false,
            max_bytes,
        }
    }

    /// Feed raw bytes; returns the data of every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut line_start = 0;
        let mut from = self.scanned;
        while let Some(offset) = buf[from..].iter().position(|b| *b == b'\n') {
            let line_end = from + offset;
            if self.skipping_line {
                self.skipping_line = false;
            } else {
                let raw = &buf[line_start..line_end];
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                self.process_line(&String::from_utf8_lossy(raw), &mut out);
            }
            line_start = line_end + 1;
            from = line_start;
        }
        buf.drain(..line_start);

        if buf.len() > self.max_bytes {
            warn!(bytes = buf.len(), limit = self.max_bytes, "sse line over limit, dropping it");
            buf.clear();
            self.skipping_line = true;
        }
        self.scanned = buf.len();
        self.pending = buf;
        out
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                out.push(self.data.join("\n"));
            }
            self.data.clear();
            self.data_bytes = 0;
            self.skipping_event = false;
            return;
        }
        if line.starts_with(':') || self.skipping_event {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field != "data" {
            return;
        }
        self.data_bytes += value.len() + 1;
        if self.data_bytes > self.max_bytes {
            warn!(limit = self.max_bytes, "sse event over limit, dropping it");
            self.data.clear();
            self.skipping_event = true;
            return;
        }
        self.data.push(value.to_string());
    }
}

/// Realtime channel over an SSE response body.
pub struct SseChannel<S> {
    /// `None` once closed or exhausted; dropping it releases the connection.
    body: Option<S>,
    decoder: SseDecoder,
    queue: VecDeque<String>,
}

impl<S> fmt::Debug for SseChannel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseChannel")
            .field("queued", &self.queue.len())
            .field("open", &self.body.is_some())
            .finish_non_exhaustive()
    }
}

impl<S> SseChannel<S> {
    /// Wrap a byte stream (typically `reqwest::Response::bytes_stream`).
    pub fn new(body: S) -> Self {
        Self {
            body: Some(body),
            decoder: SseDecoder::new(),
            queue: VecDeque::new(),
        }
    }

    /// Whether the body is still held.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.body.is_some()
    }
}

#[async_trait]
impl<S, B, E> Channel for SseChannel<S>
where
    S: Stream<Item = Result<B, E>> + Unpin + Send,
    B: AsRef<[u8]> + Send,
    E: fmt::Display + Send,
{
    fn kind(&self) -> ChannelKind {
        ChannelKind::ServerSentEvents
    }

    async fn next_event(&mut self) -> Option<PlaygroundResult<StreamEvent>> {
        loop {
            while let Some(data) = self.queue.pop_front() {
                match StreamEvent::decode(&data) {
                    Ok(Some(event)) => return Some(Ok(event)),
                    Ok(None) => {}
                    Err(err) => return Some(Err(err.into())),
                }
            }

            let body = self.body.as_mut()?;
            match body.next().await {
                Some(Ok(chunk)) => {
                    let events = self.decoder.push(chunk.as_ref());
                    self.queue.extend(events);
                }
                Some(Err(err)) => {
                    return Some(Err(TransportError::ChannelClosed {
                        reason: format!("sse stream error: {err}"),
                    }
                    .into()));
                }
                None => {
                    self.body = None;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        // Dropping the body releases the HTTP connection.
        self.body = None;
        self.queue.clear();
    }
}
