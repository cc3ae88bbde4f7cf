//! Server-sent-event frame parser
//!
//! Only lines starting with the exact prefix `data: ` carry frames. The rest
//! of the line must be one JSON object with an `event` discriminator. A frame
//! that fails to decode is dropped on its own; it never ends the stream.

use serde::Deserialize;
use serde_json::Value;

use super::transport::BodyLine;
use super::StreamEvent;

/// Literal, case-sensitive frame prefix
pub const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Deserialize)]
struct WireFrame {
    event: String,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    tool: Option<WireTool>,
}

#[derive(Debug, Default, Deserialize)]
struct WireTool {
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_args: Option<Value>,
}

/// What one line amounted to
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Blank line, comment, or a field other than `data`
    Skip,

    /// A `data:` line that did not decode; carries the reason
    Malformed(String),

    /// A decoded event
    Event(StreamEvent),
}

fn content_text(content: Option<Value>) -> String {
    match content {
        Some(Value::String(text)) => text,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Decode a single line
pub fn parse_frame(line: &str) -> Frame {
    if line.trim().is_empty() {
        return Frame::Skip;
    }

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Skip;
    };

    let frame: WireFrame = match serde_json::from_str(payload) {
        Ok(frame) => frame,
        Err(e) => return Frame::Malformed(e.to_string()),
    };

    let event = match frame.event.as_str() {
        "ToolCallStarted" => {
            let tool = frame.tool.unwrap_or_default();
            StreamEvent::ToolCallStarted {
                tool_name: tool.tool_name.unwrap_or_default(),
                tool_args: tool.tool_args.unwrap_or(Value::Null),
            }
        }
        "RunContent" => StreamEvent::RunContent {
            content: content_text(frame.content),
        },
        "Retry" => StreamEvent::Retry {
            message: content_text(frame.content),
            delay: None,
        },
        "Error" => {
            let message = content_text(frame.content);
            StreamEvent::Error {
                message: if message.is_empty() {
                    "Unknown error".to_string()
                } else {
                    message
                },
            }
        }
        _ => StreamEvent::Other { event: frame.event },
    };

    Frame::Event(event)
}

/// Line-by-line decoder that keeps frame counters for diagnostics
#[derive(Debug, Default, Clone)]
pub struct SseFrameParser {
    frames: u64,
    malformed: u64,
}

impl SseFrameParser {
    /// Create a parser with zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one line, returning the event if it carried one
    pub fn parse(&mut self, line: &str) -> Option<StreamEvent> {
        match parse_frame(line) {
            Frame::Skip => None,
            Frame::Malformed(reason) => {
                self.reject(&reason);
                None
            }
            Frame::Event(event) => {
                self.frames += 1;
                Some(event)
            }
        }
    }

    /// Decode one body line; undecodable lines count as malformed frames
    pub fn parse_body_line(&mut self, line: &BodyLine) -> Option<StreamEvent> {
        match line {
            BodyLine::Text(text) => self.parse(text),
            BodyLine::Undecodable(reason) => {
                self.reject(reason);
                None
            }
        }
    }

    fn reject(&mut self, reason: &str) {
        self.malformed += 1;
        log::debug!("Dropping malformed frame: {}", reason);
    }

    /// Decoded frames so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Dropped frames so far
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}

/// Lazily decode a sequence of lines into events
pub fn parse_lines<I, S>(lines: I) -> impl Iterator<Item = StreamEvent>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parser = SseFrameParser::new();
    lines.into_iter().filter_map(move |line| parser.parse(line.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_frame() {
        let frame = parse_frame(
            r#"data: {"event":"ToolCallStarted","tool":{"tool_name":"search_knowledge_base","tool_args":{"query":"receita"}}}"#,
        );
        assert_eq!(
            frame,
            Frame::Event(StreamEvent::ToolCallStarted {
                tool_name: "search_knowledge_base".to_string(),
                tool_args: json!({"query": "receita"}),
            })
        );
    }

    #[test]
    fn test_prefix_is_exact() {
        assert_eq!(parse_frame(r#"Data: {"event":"RunContent"}"#), Frame::Skip);
        assert_eq!(parse_frame(r#"data:{"event":"RunContent"}"#), Frame::Skip);
        assert_eq!(parse_frame("event: RunContent"), Frame::Skip);
        assert_eq!(parse_frame("   "), Frame::Skip);
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(parse_frame("data: {not json"), Frame::Malformed(_)));
        assert!(matches!(parse_frame(r#"data: {"content":"x"}"#), Frame::Malformed(_)));
        assert!(matches!(parse_frame("data: "), Frame::Malformed(_)));
    }

    #[test]
    fn test_unknown_discriminator_passes_through() {
        assert_eq!(
            parse_frame(r#"data: {"event":"RunCompleted","content":"done"}"#),
            Frame::Event(StreamEvent::Other {
                event: "RunCompleted".to_string()
            })
        );
    }

    #[test]
    fn test_parse_lines_keeps_valid_frames_in_order() {
        let lines = [
            r#"data: {"event":"RunContent","content":"A receita"}"#,
            "data: {broken",
            "",
            ": keep-alive",
            r#"data: {"event":"RunContent","content":" cresceu"}"#,
            "data: null",
            r#"data: {"event":"RunContent","content":12}"#,
        ];

        let events: Vec<_> = parse_lines(lines).collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::RunContent {
                    content: "A receita".to_string()
                },
                StreamEvent::RunContent {
                    content: " cresceu".to_string()
                },
                StreamEvent::RunContent {
                    content: "12".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_parser_counters() {
        let mut parser = SseFrameParser::new();
        assert!(parser.parse("data: [").is_none());
        assert!(parser.parse("").is_none());
        assert!(parser
            .parse(r#"data: {"event":"Retry","content":"wait"}"#)
            .is_some());
        assert_eq!(parser.frames(), 1);
        assert_eq!(parser.malformed(), 1);
    }

    #[test]
    fn test_error_without_content() {
        assert_eq!(
            parse_frame(r#"data: {"event":"Error"}"#),
            Frame::Event(StreamEvent::Error {
                message: "Unknown error".to_string()
            })
        );
    }

    #[test]
    fn test_undecodable_body_line_counts_as_malformed() {
        let mut parser = SseFrameParser::new();

        assert!(parser
            .parse_body_line(&BodyLine::Undecodable("invalid UTF-8".to_string()))
            .is_none());
        assert_eq!(
            parser.parse_body_line(&BodyLine::from(r#"data: {"event":"RunContent","content":"b"}"#)),
            Some(StreamEvent::RunContent {
                content: "b".to_string()
            })
        );
        assert_eq!(parser.malformed(), 1);
        assert_eq!(parser.frames(), 1);
    }
}
