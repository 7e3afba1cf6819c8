//! Incremental parsing of `text/event-stream` chat completions.
//!
//! The API delivers chunks as `data: {json}` lines terminated by a final
//! `data: [DONE]`. Network reads land on arbitrary byte boundaries, so the
//! parser buffers until a full line is available before decoding.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;

use crate::error::LlmError;
use crate::types::StreamResponse;

/// One increment of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionChunk {
    /// New text appended to the answer. Empty for the terminal chunk.
    pub delta: String,
    /// True exactly once, on the final chunk.
    pub done: bool,
}

impl CompletionChunk {
    fn delta(text: String) -> Self {
        Self { delta: text, done: false }
    }

    fn finished() -> Self {
        Self { delta: String::new(), done: true }
    }
}

pin_project! {
    /// A stream of [`CompletionChunk`]s decoded from an SSE response body.
    pub struct CompletionStream<S> {
        #[pin]
        inner: S,
        parser: SseParser,
        pending: Vec<CompletionChunk>,
        terminated: bool,
    }
}

impl<S> CompletionStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    pub(crate) fn new(inner: S) -> Self {
        Self {
            inner,
            parser: SseParser::default(),
            pending: Vec::new(),
            terminated: false,
        }
    }
}

impl<S> Stream for CompletionStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    type Item = Result<CompletionChunk, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if !this.pending.is_empty() {
                let chunk = this.pending.remove(0);
                if chunk.done {
                    *this.terminated = true;
                }
                return Poll::Ready(Some(Ok(chunk)));
            }
            if *this.terminated {
                return Poll::Ready(None);
            }
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => match this.parser.feed(&bytes) {
                    Ok(chunks) => *this.pending = chunks,
                    Err(err) => {
                        *this.terminated = true;
                        return Poll::Ready(Some(Err(err)));
                    }
                },
                Poll::Ready(Some(Err(err))) => {
                    *this.terminated = true;
                    return Poll::Ready(Some(Err(LlmError::Network(err))));
                }
                Poll::Ready(None) => {
                    // Upstream closed without [DONE]; synthesize the terminal
                    // chunk so callers always observe completion.
                    *this.terminated = true;
                    return Poll::Ready(Some(Ok(CompletionChunk::finished())));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Line-buffering decoder for the SSE wire format.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Absorbs a network read and returns every chunk completed by it.
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<CompletionChunk>, LlmError> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = std::str::from_utf8(&line)
                .map_err(|_| LlmError::Parse("stream is not valid utf-8".into()))?
                .trim_end_matches(&['\n', '\r'][..]);
            if let Some(chunk) = Self::decode_line(line)? {
                let done = chunk.done;
                out.push(chunk);
                if done {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn decode_line(line: &str) -> Result<Option<CompletionChunk>, LlmError> {
        // Blank keep-alives and comment/event fields carry no payload.
        let Some(payload) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(None);
        }
        if payload == "[DONE]" {
            return Ok(Some(CompletionChunk::finished()));
        }
        let parsed: StreamResponse = serde_json::from_str(payload)
            .map_err(|err| LlmError::Parse(format!("bad stream chunk: {err}")))?;
        let Some(choice) = parsed.choices.first() else {
            return Ok(None);
        };
        if let Some(text) = choice.delta.content.as_deref() {
            if !text.is_empty() {
                return Ok(Some(CompletionChunk::delta(text.to_string())));
            }
        }
        // Role-only and finish frames produce nothing; the [DONE]
        // sentinel is the single source of termination.
        Ok(None)
    }
}
