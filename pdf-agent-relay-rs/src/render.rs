// pdf-agent-relay-rs/src/render.rs
// Terminal rendering of a streamed answer and of the transcript

use std::io::{self, Write};

use relay_sdk::{EventReducer, Message, ReducerState, Role, Session, StreamEvent};

const CURSOR: char = '▌';

/// Draws one streamed answer as events arrive
#[derive(Debug, Default)]
pub struct AnswerRenderer {
    cursor_shown: bool,
}

impl AnswerRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after the reducer has applied `event`
    pub fn update(&mut self, event: &StreamEvent, reducer: &EventReducer) {
        let mut out = io::stdout().lock();

        match event {
            StreamEvent::RunContent { content } => {
                self.hide_cursor(&mut out);
                let _ = write!(out, "{}{}", content, CURSOR);
                self.cursor_shown = true;
            }
            StreamEvent::ToolCallStarted { .. } => {
                self.hide_cursor(&mut out);
                if let Some((name, args)) = reducer.active_tool() {
                    let args = serde_json::to_string_pretty(args).unwrap_or_else(|_| args.to_string());
                    let _ = writeln!(out, "\n⚙  running {}…\n{}", name, args);
                }
            }
            StreamEvent::Retry { message, .. } => {
                self.hide_cursor(&mut out);
                let _ = writeln!(out, "\n⟳  {}", message);
            }
            StreamEvent::Error { message } => {
                self.hide_cursor(&mut out);
                let _ = writeln!(out, "\n❌ {}", message);
            }
            StreamEvent::Other { .. } => {}
        }

        let _ = out.flush();
    }

    /// Called once the stream has ended
    pub fn finish(&mut self, state: &ReducerState, session: &Session) {
        let mut out = io::stdout().lock();
        self.hide_cursor(&mut out);

        let answered = session
            .last()
            .map(|m| m.role == Role::Assistant && !m.content.trim().is_empty())
            .unwrap_or(false);

        if *state == ReducerState::Completed && !answered {
            let _ = writeln!(out, "\n⚠️  No answer received from the API.");
        } else if *state == ReducerState::Completed {
            let _ = writeln!(out);
        }

        let _ = out.flush();
    }

    fn hide_cursor(&mut self, out: &mut impl Write) {
        if self.cursor_shown {
            // Backspace over the cursor cell
            let _ = write!(out, "\u{8} \u{8}");
            self.cursor_shown = false;
        }
    }
}

/// Print the whole transcript
pub fn print_history(session: &Session) {
    if session.is_empty() {
        println!("(no messages yet)");
        return;
    }

    for message in session.messages() {
        print_message(message);
    }
}

fn print_message(message: &Message) {
    println!(
        "[{} {}] {}",
        message.created_at.format("%H:%M:%S"),
        message.role,
        message.content
    );

    if let Some(ref process) = message.process {
        for trace in process {
            println!("    ⚙ {} {}", trace.tool_name, trace.tool_args);
        }
    }
}
