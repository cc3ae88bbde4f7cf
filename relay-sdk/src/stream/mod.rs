//! Streaming agent runs
//!
//! The transport yields raw lines, the parser turns them into events, and the
//! client adds whole-request retries on top.

mod client;
mod events;
pub mod parser;
mod transport;

use uuid::Uuid;

pub use client::{StreamPolicy, StreamRetryClient};
pub use events::StreamEvent;
pub use parser::{parse_frame, parse_lines, Frame, SseFrameParser};
pub use transport::{
    BodyLine, BodyLineCodec, HttpStreamTransport, LineStream, StreamTransport, MAX_LINE_LENGTH,
};

/// One user message to send to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Local identifier used in log lines
    pub id: Uuid,

    /// Message text
    pub message: String,

    /// Server-side conversation, if any
    pub session_id: Option<String>,

    /// Caller identity, if any
    pub user_id: Option<String>,
}

impl StreamRequest {
    /// Create a request for `message`
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            id: crate::util::generate_request_id(),
            message: message.into(),
            session_id: None,
            user_id: None,
        }
    }

    /// Attach a server-side session
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a caller identity
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}
