/// Upstream SSE frame reassembly.
///
/// Raw response bytes arrive in arbitrary read boundaries. [`SseParser`]
/// buffers partial lines, accumulates `data:` lines into one payload per
/// event and releases the payload on a blank line. [`json_event_stream`]
/// drives the parser over a byte stream and decodes each payload as JSON,
/// dropping malformed payloads without ending the sequence.
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use memchr::memchr_iter;
use serde::de::DeserializeOwned;
use smallvec::SmallVec;

use crate::error::GatewayError;
use crate::protocol::gemini::{GeminiResponse, UpstreamEnvelope};
use crate::transport::within_idle;

struct PendingPayloads {
    payloads: SmallVec<[String; 8]>,
    head: usize,
}

impl PendingPayloads {
    #[inline]
    fn new() -> Self {
        Self {
            payloads: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<String> {
        if self.head >= self.payloads.len() {
            return None;
        }
        let payload = std::mem::take(&mut self.payloads[self.head]);
        self.head += 1;
        if self.head == self.payloads.len() {
            self.payloads.clear();
            self.head = 0;
        }
        Some(payload)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<String>) {
        self.payloads.extend(parsed.drain(..));
    }
}

/// Incremental SSE line parser yielding the joined `data:` payload of
/// every completed event.
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    data_buffer: String,
    has_data: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            data_buffer: String::new(),
            has_data: false,
        }
    }

    /// Feed raw text and return any complete payloads.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete payloads into `out`.
    ///
    /// A line is only classified once its terminating `\n` has arrived.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<String>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        let bytes = self.buffer.as_bytes();
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(line, &mut self.data_buffer, &mut self.has_data, out);
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush state at end of input. An unterminated final line is processed
    /// as a line, and a pending payload without a trailing blank line is
    /// released.
    pub fn finish(&mut self) -> Option<String> {
        let mut out = Vec::new();
        if self.read_offset < self.buffer.len() {
            let tail = std::mem::take(&mut self.buffer);
            let line = tail[self.read_offset..].trim_end_matches('\r');
            Self::process_line(line, &mut self.data_buffer, &mut self.has_data, &mut out);
            self.read_offset = 0;
        }
        if self.has_data {
            self.has_data = false;
            out.push(std::mem::take(&mut self.data_buffer));
        }
        out.pop()
    }

    fn process_line(
        line: &str,
        data_buffer: &mut String,
        has_data: &mut bool,
        out: &mut Vec<String>,
    ) {
        if line.is_empty() {
            if *has_data {
                out.push(std::mem::take(data_buffer));
                *has_data = false;
            }
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        }
        // `event:`, `id:`, `retry:` and comments carry nothing the gateway uses.
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode buffered bytes into the parser, keeping an incomplete trailing
/// UTF-8 sequence for the next read.
fn feed_utf8(parser: &mut SseParser, remainder: &mut Vec<u8>, bytes: &[u8], out: &mut Vec<String>) {
    remainder.extend_from_slice(bytes);
    match std::str::from_utf8(remainder) {
        Ok(text) => {
            parser.feed_into(text, out);
            remainder.clear();
        }
        Err(err) if err.error_len().is_none() => {
            let valid_up_to = err.valid_up_to();
            let text = String::from_utf8_lossy(&remainder[..valid_up_to]);
            parser.feed_into(&text, out);
            remainder.drain(..valid_up_to);
        }
        Err(_) => {
            let text = String::from_utf8_lossy(remainder).into_owned();
            parser.feed_into(&text, out);
            remainder.clear();
        }
    }
}

fn decode_payload<T: DeserializeOwned>(payload: &str) -> Option<T> {
    let trimmed = payload.trim();
    if trimmed.is_empty() || trimmed == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<T>(trimmed) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(error = %err, bytes = trimmed.len(), "dropping malformed upstream frame");
            None
        }
    }
}

struct ReassemblyState<S> {
    stream: std::pin::Pin<Box<S>>,
    parser: SseParser,
    remainder: Vec<u8>,
    parsed: Vec<String>,
    pending: PendingPayloads,
    idle_timeout: Option<Duration>,
    finished: bool,
}

/// Reassemble an upstream byte stream into decoded JSON events.
///
/// The sequence ends after the byte stream ends (with a final flush of any
/// trailing payload), after the first transport error, or after the byte
/// stream stays silent longer than `idle_timeout`.
pub fn json_event_stream<T, S>(
    byte_stream: S,
    idle_timeout: Option<Duration>,
) -> impl Stream<Item = Result<T, GatewayError>> + Send
where
    T: DeserializeOwned + Send + 'static,
    S: Stream<Item = Result<Bytes, GatewayError>> + Send + 'static,
{
    let state = ReassemblyState {
        stream: Box::pin(byte_stream),
        parser: SseParser::new(),
        remainder: Vec::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingPayloads::new(),
        idle_timeout,
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            while let Some(payload) = state.pending.pop_front() {
                if let Some(event) = decode_payload::<T>(&payload) {
                    return Some((Ok(event), state));
                }
            }
            if state.finished {
                return None;
            }

            let next = match within_idle(state.idle_timeout, state.stream.next()).await {
                Ok(next) => next,
                Err(err) => {
                    state.finished = true;
                    return Some((Err(err), state));
                }
            };

            match next {
                Some(Ok(bytes)) => {
                    feed_utf8(
                        &mut state.parser,
                        &mut state.remainder,
                        &bytes,
                        &mut state.parsed,
                    );
                    state.pending.extend_from_vec(&mut state.parsed);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err), state));
                }
                None => {
                    state.finished = true;
                    if !state.remainder.is_empty() {
                        let tail = String::from_utf8_lossy(&state.remainder).into_owned();
                        state.remainder.clear();
                        state.parser.feed_into(&tail, &mut state.parsed);
                        state.pending.extend_from_vec(&mut state.parsed);
                    }
                    if let Some(payload) = state.parser.finish() {
                        state.parsed.push(payload);
                        state.pending.extend_from_vec(&mut state.parsed);
                    }
                }
            }
        }
    })
}

/// [`json_event_stream`] specialised to upstream generateContent events,
/// accepting both the bare and the `response`-wrapped shape.
pub fn upstream_event_stream<S>(
    byte_stream: S,
    idle_timeout: Option<Duration>,
) -> impl Stream<Item = Result<GeminiResponse, GatewayError>> + Send
where
    S: Stream<Item = Result<Bytes, GatewayError>> + Send + 'static,
{
    json_event_stream::<UpstreamEnvelope, S>(byte_stream, idle_timeout)
        .map(|item| item.map(UpstreamEnvelope::into_response))
}

pub const DONE_FRAME: &str = "data: [DONE]\n\n";
