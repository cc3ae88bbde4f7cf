//! Streaming HTTP boundary
//!
//! A transport opens one request and hands back its body as a stream of
//! lines. It does not parse frames and never retries; the client does both.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use reqwest::{header, Client};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;

use super::StreamRequest;
use crate::error::{RelayError, Result};
use crate::http::{build_http_client, parse_error_response, UserAgent};

/// One line of a response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyLine {
    /// A line of text, without its terminator
    Text(String),

    /// A line that could not be read as text; carries the reason
    Undecodable(String),
}

impl From<&str> for BodyLine {
    fn from(line: &str) -> Self {
        BodyLine::Text(line.to_string())
    }
}

/// Lines of one response body, as the transport produced them
pub type LineStream = BoxStream<'static, Result<BodyLine>>;

/// Longest line accepted from the wire
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Splits a body on `\n` without ever failing on line content.
///
/// Invalid UTF-8 and over-long lines come out as `BodyLine::Undecodable`
/// and decoding carries on with the next line. Only I/O errors from the
/// underlying reader end the stream.
#[derive(Debug, Clone)]
pub struct BodyLineCodec {
    max_length: usize,
    next_index: usize,
    discarding: bool,
}

impl BodyLineCodec {
    /// Create a codec dropping lines longer than `max_length` bytes
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    fn too_long(&self) -> BodyLine {
        BodyLine::Undecodable(format!("line longer than {} bytes", self.max_length))
    }
}

fn decode_line(mut line: &[u8]) -> BodyLine {
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }

    match std::str::from_utf8(line) {
        Ok(text) => BodyLine::Text(text.to_string()),
        Err(e) => BodyLine::Undecodable(format!("invalid UTF-8: {}", e)),
    }
}

impl Decoder for BodyLineCodec {
    type Item = BodyLine;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<BodyLine>> {
        loop {
            let read_to = self.max_length.saturating_add(1).min(buf.len());
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                    return Ok(Some(self.too_long()));
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    return Ok(Some(decode_line(&line[..end])));
                }
                (false, None) if buf.len() > self.max_length => {
                    log::debug!("Discarding line longer than {} bytes", self.max_length);
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<BodyLine>> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }

        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            buf.clear();
            return Ok(Some(self.too_long()));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        let line = buf.split_to(buf.len());
        Ok(Some(decode_line(&line)))
    }
}

/// Opens streaming requests
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Start one request and return its body as lines
    async fn open(&self, request: &StreamRequest) -> Result<LineStream>;

    /// Address shown in error messages
    fn endpoint(&self) -> &str;
}

/// Transport posting to an agent's `runs` endpoint
#[derive(Debug, Clone)]
pub struct HttpStreamTransport {
    /// HTTP client
    http_client: Client,

    /// Full runs URL
    endpoint: String,

    /// Bearer credential
    api_key: Option<String>,
}

impl HttpStreamTransport {
    /// Create a transport for `endpoint`
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        // No total timeout: the client bounds each read instead
        let http_client = build_http_client(
            Some(UserAgent::component("stream")),
            None,
            connect_timeout,
        )?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            api_key: None,
        })
    }

    /// Set the bearer credential
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }
}

/// Map a body read error back to a RelayError, keeping reqwest's classification
fn body_error(err: io::Error) -> RelayError {
    match err.into_inner() {
        Some(inner) => match inner.downcast::<reqwest::Error>() {
            Ok(reqwest_err) => RelayError::from(*reqwest_err),
            Err(other) => RelayError::network(format!("Stream interrupted: {}", other)),
        },
        None => RelayError::network("Stream interrupted"),
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    async fn open(&self, request: &StreamRequest) -> Result<LineStream> {
        let mut form: Vec<(&str, &str)> =
            vec![("message", request.message.as_str()), ("stream", "true")];
        if let Some(ref session_id) = request.session_id {
            form.push(("session_id", session_id.as_str()));
        }
        if let Some(ref user_id) = request.user_id {
            form.push(("user_id", user_id.as_str()));
        }

        log::debug!("Opening stream {} at {}", request.id, self.endpoint);

        let mut builder = self
            .http_client
            .post(&self.endpoint)
            .header(header::ACCEPT, "text/event-stream")
            .form(&form);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(parse_error_response("agent", response).await);
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));
        let lines = FramedRead::new(StreamReader::new(bytes), BodyLineCodec::new(MAX_LINE_LENGTH))
            .map(|line| line.map_err(body_error));

        Ok(lines.boxed())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
