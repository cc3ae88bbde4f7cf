//! In-memory chat transcript
//!
//! A session is an append-only list of messages. The assistant reply being
//! streamed lives in an `EventReducer` until the stream ends, and only then
//! is appended.

mod reducer;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use reducer::{EventReducer, ReducerState};

use crate::stream::{StreamEvent, StreamRequest, StreamRetryClient};

/// Message author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person asking
    User,
    /// The agent answering
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A tool call the agent made while answering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallTrace {
    pub tool_name: String,
    pub tool_args: Value,
}

/// One transcript entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Author
    pub role: Role,

    /// Final text
    pub content: String,

    /// Tool calls behind an assistant reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<Vec<ToolCallTrace>>,

    /// When the message was appended
    pub created_at: DateTime<Utc>,
}

/// Ordered chat transcript
#[derive(Debug, Clone)]
pub struct Session {
    /// Session identifier
    pub id: Uuid,

    messages: Vec<Message>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
        }
    }

    /// Append the user's message
    pub fn push_user(&mut self, content: impl Into<String>) -> &Message {
        self.messages.push(Message {
            role: Role::User,
            content: content.into(),
            process: None,
            created_at: Utc::now(),
        });
        &self.messages[self.messages.len() - 1]
    }

    /// Append a finished assistant reply
    pub fn push_assistant(&mut self, message: Message) -> &Message {
        debug_assert_eq!(message.role, Role::Assistant);
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// Messages in the order they were appended
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Send one message and stream the reply into the session
///
/// `on_update` runs after every event with the reducer's live state. Exactly
/// one assistant message is appended, whatever the outcome.
pub async fn converse<F>(
    client: &StreamRetryClient,
    session: &mut Session,
    message: &str,
    cancel: CancellationToken,
    mut on_update: F,
) -> ReducerState
where
    F: FnMut(&StreamEvent, &EventReducer),
{
    session.push_user(message);

    let mut events = client.open_stream(StreamRequest::new(message), cancel);
    let mut reducer = EventReducer::new();

    while let Some(event) = events.recv().await {
        let more = reducer.apply(&event);
        on_update(&event, &reducer);
        if !more {
            break;
        }
    }

    reducer.end_of_stream();
    let state = reducer.state().clone();
    session.push_assistant(reducer.finish());

    state
}
