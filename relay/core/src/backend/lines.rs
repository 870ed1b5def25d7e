//! Line Framing for Streamed Bodies
//!
//! Providers stream newline-delimited frames (SSE `data:` lines, NDJSON).
//! Chunks from the socket split lines, and multi-byte characters, at
//! arbitrary points, so bytes are buffered and only complete lines are
//! decoded. Each backend supplies a line parser; [`fragment_stream`] does
//! the rest.

use futures::{Stream, StreamExt};

use super::traits::FragmentStream;

/// What one body line means to the stream
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    /// Text to hand on
    Fragment(String),
    /// Nothing to hand on (keepalive, metadata, blank)
    Skip,
    /// The provider signalled completion
    Done,
    /// The provider reported an error in-band
    Error(String),
}

/// Fail with the response body if the status is not a success
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    backend: &str,
) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{backend} returned {status}: {body}");
    }
    Ok(response)
}

/// Lazily turn a streaming response body into fragments
pub(crate) fn fragment_stream(response: reqwest::Response, parse: fn(&str) -> Frame) -> FragmentStream {
    Box::pin(frames(response, parse))
}

fn frames(
    response: reqwest::Response,
    parse: fn(&str) -> Frame,
) -> impl Stream<Item = anyhow::Result<String>> + Send {
    async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut done = false;

        'read: while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for line in lines.push(&chunk) {
                match parse(&line) {
                    Frame::Fragment(text) => yield text,
                    Frame::Skip => {}
                    Frame::Done => {
                        done = true;
                        break 'read;
                    }
                    Frame::Error(message) => Err::<(), _>(anyhow::anyhow!(message))?,
                }
            }
        }

        if !done {
            if let Some(line) = lines.finish() {
                match parse(&line) {
                    Frame::Fragment(text) => yield text,
                    Frame::Error(message) => Err::<(), _>(anyhow::anyhow!(message))?,
                    Frame::Skip | Frame::Done => {}
                }
            }
        }
    }
}

/// Accumulates raw body bytes and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and take every line it completed
    ///
    /// Lines are returned without the trailing `\n` or `\r\n`. Invalid UTF-8
    /// is replaced rather than rejected.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        pull_lines(&mut self.buf)
    }

    /// Take whatever is left once the body has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode(&rest))
    }
}

fn decode(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

fn pull_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let Some(last) = buf.iter().rposition(|b| *b == b'\n') else {
        return Vec::new();
    };
    let rest = buf.split_off(last + 1);
    let complete = std::mem::replace(buf, rest);
    complete[..last].split(|b| *b == b'\n').map(decode).collect()
}

/// The payload of an SSE `data:` line, if this is one
#[must_use]
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}
