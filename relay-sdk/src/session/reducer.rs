//! Folds a stream of events into one assistant message

use chrono::Utc;
use serde_json::Value;

use super::{Message, Role, ToolCallTrace};
use crate::stream::StreamEvent;

/// Where a reduction stands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReducerState {
    /// No event seen yet
    #[default]
    Idle,

    /// Events are arriving
    Streaming,

    /// The stream ended without an error
    Completed,

    /// An `Error` event ended the stream
    Failed,
}

impl ReducerState {
    /// Whether no further events will be applied
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Accumulates one request's events into live display state and a final message
#[derive(Debug, Default)]
pub struct EventReducer {
    state: ReducerState,
    content: String,
    process: Vec<ToolCallTrace>,
    retries: u32,
}

impl EventReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event; returns whether the reducer still accepts events
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        match event {
            StreamEvent::ToolCallStarted {
                tool_name,
                tool_args,
            } => {
                self.state = ReducerState::Streaming;
                self.process.push(ToolCallTrace {
                    tool_name: tool_name.clone(),
                    tool_args: tool_args.clone(),
                });
            }
            StreamEvent::RunContent { content } => {
                self.state = ReducerState::Streaming;
                self.content.push_str(content);
            }
            StreamEvent::Retry { .. } => {
                // The next attempt starts from scratch
                self.state = ReducerState::Streaming;
                self.content.clear();
                self.process.clear();
                self.retries += 1;
            }
            StreamEvent::Error { message } => {
                self.state = ReducerState::Failed;
                self.content = message.clone();
                return false;
            }
            StreamEvent::Other { event } => {
                log::trace!("Ignoring {} event", event);
            }
        }

        true
    }

    /// Text accumulated by the current attempt
    pub fn partial_content(&self) -> &str {
        &self.content
    }

    /// The most recent tool call of the current attempt
    pub fn active_tool(&self) -> Option<(&str, &Value)> {
        self.process
            .last()
            .map(|trace| (trace.tool_name.as_str(), &trace.tool_args))
    }

    pub fn state(&self) -> &ReducerState {
        &self.state
    }

    /// `Retry` events seen so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Record the natural end of the stream
    pub fn end_of_stream(&mut self) {
        if !self.state.is_terminal() {
            self.state = ReducerState::Completed;
        }
    }

    /// Close the reduction and produce its single assistant message
    pub fn finish(mut self) -> Message {
        self.end_of_stream();

        Message {
            role: Role::Assistant,
            content: self.content,
            process: (!self.process.is_empty()).then_some(self.process),
            created_at: Utc::now(),
        }
    }
}
