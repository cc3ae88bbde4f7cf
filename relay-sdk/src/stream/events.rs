//! Typed events decoded from the agent's event stream

use std::time::Duration;

use serde_json::Value;

/// One event of a streamed agent run, in wire order
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The agent started a tool call
    ToolCallStarted { tool_name: String, tool_args: Value },

    /// A fragment of the answer
    RunContent { content: String },

    /// The request is being restarted; partial output so far is void
    Retry {
        message: String,
        delay: Option<Duration>,
    },

    /// Terminal failure with a human-readable description
    Error { message: String },

    /// A discriminator this client does not know; ignored downstream
    Other { event: String },
}

impl StreamEvent {
    /// Whether nothing may follow this event
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error { .. })
    }

    /// The wire discriminator of this event
    pub fn name(&self) -> &str {
        match self {
            StreamEvent::ToolCallStarted { .. } => "ToolCallStarted",
            StreamEvent::RunContent { .. } => "RunContent",
            StreamEvent::Retry { .. } => "Retry",
            StreamEvent::Error { .. } => "Error",
            StreamEvent::Other { event } => event,
        }
    }
}
