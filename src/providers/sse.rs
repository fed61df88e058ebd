use bytes::Bytes;
use futures::stream::Stream;
use pin_project::pin_project;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::error::ProviderError;

/// One Server-Sent-Events event as received from a vendor endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Parse the fields of one complete event block (no trailing blank line).
fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data = String::new();

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.strip_prefix(' ').unwrap_or(value));
        } else if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // "id:", "retry:" and comment lines are ignored.
    }

    if data.is_empty() && event.is_none() {
        None
    } else {
        Some(SseEvent { event, data })
    }
}

/// Incremental SSE parser state. Bytes go in, complete events come out;
/// partial events stay buffered until their terminating blank line arrives.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every event completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        loop {
            let lf = self.buffer.find("\n\n").map(|at| (at, 2));
            let crlf = self.buffer.find("\r\n\r\n").map(|at| (at, 4));
            let (at, len) = match (lf, crlf) {
                (Some(a), Some(b)) => std::cmp::min(a, b),
                (Some(a), None) => a,
                (None, Some(b)) => b,
                (None, None) => break,
            };
            let block: String = self.buffer.drain(..at + len).collect();
            if let Some(event) = parse_event_block(block.trim_end()) {
                events.push(event);
            }
        }
        events
    }

    /// Flush any trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            parse_event_block(rest)
        }
    }
}

/// Adapter turning a byte stream (e.g. `reqwest::Response::bytes_stream`)
/// into a stream of parsed SSE events.
#[pin_project]
pub struct SseStream<S> {
    #[pin]
    inner: S,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    done: bool,
}

impl<S> SseStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            parser: SseParser::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }
}

impl<S> Stream for SseStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    type Item = Result<SseEvent, ProviderError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.pending.extend(this.parser.feed(&bytes));
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(ProviderError::from(e))));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    if let Some(event) = this.parser.finish() {
                        this.pending.push_back(event);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
