//! Transcript reconstruction from decoded stream events.
//!
//! Answer tokens accumulate into text blocks. A `tool_start` opens a pending
//! tool block keyed by its call id; the matching `tool_end` fills that block
//! in place. A `tool_end` for an id with no pending block is an error.
//!
//! Frames the decoder could not read are recorded as notices and do not end
//! the transcript; only a server `error` event does.

use std::collections::HashMap;

use toolrelay_core::error::ProtocolError;
use toolrelay_core::stream::StreamEvent;

/// One renderable unit of the transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text(String),
    Tool(ToolBlock),
    /// A frame that could not be decoded.
    Notice(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolBlock {
    pub id: String,
    pub tool: String,
    pub input: serde_json::Value,
    /// `None` while the call is in flight.
    pub output: Option<serde_json::Value>,
}

impl ToolBlock {
    pub fn is_pending(&self) -> bool {
        self.output.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Waiting for the run to open.
    Connecting,
    Streaming,
    Complete,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TranscriptBuilder {
    blocks: Vec<Block>,
    tool_index: HashMap<String, usize>,
    status: Status,
}

impl Default for TranscriptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptBuilder {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            tool_index: HashMap::new(),
            status: Status::Connecting,
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, Status::Complete | Status::Failed(_))
    }

    /// The answer text accumulated so far.
    pub fn answer(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Text(t) => Some(t.as_str()),
                Block::Tool(_) | Block::Notice(_) => None,
            })
            .collect()
    }

    /// Apply one decoder item. A decode failure becomes a notice and the
    /// transcript keeps going.
    pub fn apply_decoded(
        &mut self,
        item: Result<StreamEvent, ProtocolError>,
    ) -> Result<(), ProtocolError> {
        match item {
            Ok(event) => self.apply(event),
            Err(err) => {
                self.record_decode_error(&err);
                Ok(())
            }
        }
    }

    /// Note a frame the decoder rejected.
    pub fn record_decode_error(&mut self, err: &ProtocolError) {
        if !self.is_finished() {
            self.blocks.push(Block::Notice(err.to_string()));
        }
    }

    /// Apply one event. Events after the terminal one are ignored.
    ///
    /// A `tool_end` without a pending block fails the transcript and is
    /// returned as an error.
    pub fn apply(&mut self, event: StreamEvent) -> Result<(), ProtocolError> {
        if self.is_finished() {
            return Ok(());
        }

        match event {
            StreamEvent::Connected => self.status = Status::Streaming,
            StreamEvent::Token { token } => {
                self.status = Status::Streaming;
                match self.blocks.last_mut() {
                    Some(Block::Text(text)) => text.push_str(&token),
                    _ => self.blocks.push(Block::Text(token)),
                }
            }
            StreamEvent::ToolStart { id, tool, input } => {
                self.status = Status::Streaming;
                self.tool_index.insert(id.clone(), self.blocks.len());
                self.blocks.push(Block::Tool(ToolBlock {
                    id,
                    tool,
                    input,
                    output: None,
                }));
            }
            StreamEvent::ToolEnd { id, output, .. } => {
                let slot = self.tool_index.get(&id).and_then(|&i| match self.blocks.get_mut(i) {
                    Some(Block::Tool(block)) if block.is_pending() => Some(block),
                    _ => None,
                });
                match slot {
                    Some(block) => block.output = Some(output),
                    None => {
                        let err = ProtocolError::UnknownToolCall(id);
                        self.fail(err.to_string());
                        return Err(err);
                    }
                }
            }
            StreamEvent::Done => self.status = Status::Complete,
            StreamEvent::Error { error } => self.fail(error),
        }
        Ok(())
    }

    /// Drop the in-progress answer and unresolved tool calls; completed
    /// tool output stays.
    fn fail(&mut self, message: String) {
        self.blocks.retain(|b| match b {
            Block::Tool(t) => !t.is_pending(),
            Block::Notice(_) => true,
            Block::Text(_) => false,
        });
        self.tool_index.clear();
        self.status = Status::Failed(message);
    }

    /// Render for a terminal.
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = self.blocks.iter().map(render_block).collect();
        if let Status::Failed(message) = &self.status {
            parts.push(format!("```error\n{message}\n```"));
        }
        parts.join("\n")
    }
}

fn render_block(block: &Block) -> String {
    match block {
        Block::Text(text) => text.clone(),
        Block::Notice(message) => format!("```warning\n{message}\n```"),
        Block::Tool(tool) => {
            let output = match &tool.output {
                Some(value) => value_text(value),
                None => "Processing...".to_string(),
            };
            format!(
                "```\ntool: {}\ninput: {}\noutput: {}\n```",
                tool.tool,
                value_text(&tool.input),
                output
            )
        }
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(id: &str) -> StreamEvent {
        StreamEvent::ToolStart {
            id: id.into(),
            tool: "calculator".into(),
            input: serde_json::json!({"expr": "2+2"}),
        }
    }

    fn end(id: &str, output: &str) -> StreamEvent {
        StreamEvent::ToolEnd {
            id: id.into(),
            tool: "calculator".into(),
            output: serde_json::json!(output),
        }
    }

    #[test]
    fn tool_block_is_spliced_in_place() {
        let mut t = TranscriptBuilder::new();
        t.apply(StreamEvent::Connected).unwrap();
        t.apply(start("1")).unwrap();
        assert!(t.render().contains("Processing..."));

        t.apply(end("1", "4")).unwrap();
        t.apply(StreamEvent::token("The answer is ")).unwrap();
        t.apply(StreamEvent::token("4")).unwrap();
        t.apply(StreamEvent::Done).unwrap();

        assert_eq!(t.status(), &Status::Complete);
        assert_eq!(t.blocks().len(), 2);
        assert_eq!(t.answer(), "The answer is 4");
        assert_eq!(
            t.render(),
            "```\ntool: calculator\ninput: {\"expr\":\"2+2\"}\noutput: 4\n```\nThe answer is 4"
        );
    }

    #[test]
    fn interleaved_pairs_resolve_by_id() {
        let mut t = TranscriptBuilder::new();
        t.apply(start("a")).unwrap();
        t.apply(start("b")).unwrap();
        t.apply(end("b", "second")).unwrap();
        t.apply(end("a", "first")).unwrap();

        let outputs: Vec<_> = t
            .blocks()
            .iter()
            .map(|b| match b {
                Block::Tool(tool) => (tool.id.as_str(), tool.output.clone()),
                other => panic!("unexpected block {other:?}"),
            })
            .collect();
        assert_eq!(
            outputs,
            vec![("a", Some(serde_json::json!("first"))), ("b", Some(serde_json::json!("second")))]
        );
    }

    #[test]
    fn unknown_tool_end_is_an_error() {
        let mut t = TranscriptBuilder::new();
        t.apply(start("1")).unwrap();
        let err = t.apply(end("2", "x")).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownToolCall("2".into()));
        assert!(matches!(t.status(), Status::Failed(m) if m.contains("unknown tool call")));
    }

    #[test]
    fn repeated_tool_end_is_an_error() {
        let mut t = TranscriptBuilder::new();
        t.apply(start("1")).unwrap();
        t.apply(end("1", "4")).unwrap();
        assert!(t.apply(end("1", "5")).is_err());
    }

    #[test]
    fn error_discards_in_flight_state_but_keeps_finished_tools() {
        let mut t = TranscriptBuilder::new();
        t.apply(start("1")).unwrap();
        t.apply(end("1", "4")).unwrap();
        t.apply(start("2")).unwrap();
        t.apply(StreamEvent::token("partial")).unwrap();
        t.apply(StreamEvent::error("Backend failure: model down")).unwrap();

        assert_eq!(t.blocks().len(), 1);
        assert_eq!(t.answer(), "");
        let rendered = t.render();
        assert!(rendered.contains("output: 4"));
        assert!(rendered.ends_with("```error\nBackend failure: model down\n```"));
    }

    #[test]
    fn events_after_terminal_are_ignored() {
        let mut t = TranscriptBuilder::new();
        t.apply(StreamEvent::Done).unwrap();
        t.apply(StreamEvent::token("late")).unwrap();
        assert!(t.apply(end("x", "y")).is_ok());
        assert_eq!(t.answer(), "");
    }

    #[test]
    fn undecodable_frame_is_a_notice_and_the_run_continues() {
        let mut wire = Vec::new();
        for event in [StreamEvent::Connected, StreamEvent::token("Hello ")] {
            wire.extend(crate::codec::encode_frame(&event).into_bytes());
        }
        wire.extend_from_slice(b"data: {garbled\n\n");
        for event in [StreamEvent::token("world"), StreamEvent::Done] {
            wire.extend(crate::codec::encode_frame(&event).into_bytes());
        }

        let mut decoder = crate::codec::FrameDecoder::new();
        let mut t = TranscriptBuilder::new();
        for item in decoder.push(&wire) {
            t.apply_decoded(item).unwrap();
        }

        assert_eq!(t.status(), &Status::Complete);
        assert_eq!(t.answer(), "Hello world");
        assert!(matches!(&t.blocks()[1], Block::Notice(m) if m.contains("not a valid event")));
        assert!(t.render().contains("```warning\n"));
    }

    #[test]
    fn notices_survive_a_failed_run() {
        let mut t = TranscriptBuilder::new();
        t.record_decode_error(&ProtocolError::InvalidUtf8);
        t.apply(StreamEvent::token("partial")).unwrap();
        t.apply(StreamEvent::error("Backend failure: model down")).unwrap();

        assert_eq!(t.blocks(), &[Block::Notice("Frame is not valid UTF-8".into())]);
        assert!(matches!(t.status(), Status::Failed(_)));
    }
}
