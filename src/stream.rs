//! Normalization of SDK streams, SSE bodies and JSON bodies into completion chunks

use crate::error::{Error, Result};
use crate::types::{CompletionChunk, CompletionResponse, CompletionStream};
use async_stream::stream;
use bytes::{Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use tracing::debug;

/// SSE data prefix
pub const DATA_PREFIX: &str = "data:";

/// SSE termination sentinel
pub const DONE_SENTINEL: &str = "[DONE]";

/// Splits a byte stream into lines.
///
/// Lines are cut on `\n` at the byte level, so multi-byte characters split
/// across network reads are reassembled before decoding. Bytes already
/// searched for a terminator are not searched again.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: BytesMut,
    scanned: usize,
}

impl SseLineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
        }
    }

    /// Append bytes read from the network
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete line, without its terminator
    pub fn next_line(&mut self) -> Option<String> {
        let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.buffer.len();
            return None;
        };
        let end = self.scanned + offset;
        let line = self.buffer.split_to(end + 1);
        self.scanned = 0;
        Some(decode_line(&line[..end]))
    }

    /// Bytes held for the current unterminated line
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Remaining unterminated line once the body has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        self.scanned = 0;
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.trim_end_matches('\r').to_string()
}

/// A relevant SSE line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Event payload after the data prefix
    Data(&'a str),
    /// Termination sentinel
    Done,
}

/// Classify one line. Lines that do not start with `data:` after trimming
/// are irrelevant and yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseLine<'_>> {
    let payload = line.trim().strip_prefix(DATA_PREFIX)?.trim();
    if payload == DONE_SENTINEL {
        Some(SseLine::Done)
    } else {
        Some(SseLine::Data(payload))
    }
}

/// Decode a fallback frame payload. Malformed JSON is skipped.
pub fn chunk_from_payload(payload: &str) -> Option<CompletionChunk> {
    match serde_json::from_str::<Value>(payload) {
        Ok(frame) => Some(CompletionChunk {
            delta_text: frame
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        Err(e) => {
            debug!(error = %e, payload_len = payload.len(), "Skipping malformed stream frame");
            None
        }
    }
}

enum Frame {
    Chunk(CompletionChunk),
    Done,
    Skip,
}

fn decode_frame(line: &str) -> Frame {
    match parse_sse_line(line) {
        Some(SseLine::Done) => Frame::Done,
        Some(SseLine::Data(payload)) => match chunk_from_payload(payload) {
            Some(chunk) => Frame::Chunk(chunk),
            None => Frame::Skip,
        },
        None => Frame::Skip,
    }
}

/// Turn an SSE response body into a lazy chunk sequence.
///
/// Reading stops at the `[DONE]` sentinel and the body is dropped, which
/// closes the connection. Dropping the returned stream early has the same
/// effect. Transport errors end the sequence after being yielded once.
pub fn sse_chunks<S, E>(body: S) -> CompletionStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    CompletionStream::new(stream! {
        let mut body = Box::pin(body);
        let mut lines = SseLineBuffer::new();
        let mut done = false;

        while !done {
            let bytes = match body.next().await {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    let failure: Result<CompletionChunk> = Err(e.into());
                    yield failure;
                    break;
                }
                None => break,
            };

            lines.push(&bytes);
            while let Some(line) = lines.next_line() {
                match decode_frame(&line) {
                    Frame::Chunk(chunk) => {
                        yield Ok(chunk);
                    }
                    Frame::Done => {
                        done = true;
                        break;
                    }
                    Frame::Skip => {}
                }
            }
        }

        if !done {
            if let Some(line) = lines.finish() {
                if let Frame::Chunk(chunk) = decode_frame(&line) {
                    yield Ok(chunk);
                }
            }
        }
    })
}

/// Map a typed SDK stream onto completion chunks, one chunk per SDK chunk
pub fn from_sdk_stream<S, T>(stream: S) -> CompletionStream
where
    S: Stream<Item = Result<T>> + Send + 'static,
    T: Into<CompletionChunk>,
{
    CompletionStream::new(stream.map(|item| item.map(Into::into)))
}

/// Normalize a non-streaming JSON body into a single response
pub fn response_from_body(body: &Value) -> CompletionResponse {
    let choice = body.pointer("/choices/0");

    CompletionResponse {
        content: choice
            .and_then(|c| c.pointer("/message/content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        finish_reason: choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}
