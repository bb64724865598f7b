//! Client-facing stream events.
//!
//! `StreamEvent` is what a run looks like from the outside. Every run emits
//! `Connected` first and exactly one terminal event (`Done` or `Error`) last.
//! In between: answer `Token`s and `ToolStart`/`ToolEnd` pairs keyed by the
//! tool call id.
//!
//! JSON shapes (tagged by `type`):
//! - `{"type":"connected"}`
//! - `{"type":"token","token":"..."}`
//! - `{"type":"tool_start","id":"...","tool":"...","input":...}`
//! - `{"type":"tool_end","id":"...","tool":"...","output":...}`
//! - `{"type":"done"}`
//! - `{"type":"error","error":"..."}`

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The transport is open and the run has started.
    Connected,

    /// Answer text fragment.
    Token { token: String },

    /// A tool call was dispatched.
    ToolStart {
        id: String,
        tool: String,
        input: serde_json::Value,
    },

    /// A dispatched tool call resolved (successfully or not).
    ToolEnd {
        id: String,
        tool: String,
        output: serde_json::Value,
    },

    /// The run reached its final answer.
    Done,

    /// The run failed; nothing follows.
    Error { error: String },
}

impl StreamEvent {
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token { token: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Wire name of this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Token { .. } => "token",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::Done => "done",
            Self::Error { .. } => "error",
        }
    }

    /// `Done` and `Error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_shape() {
        let json = serde_json::to_value(StreamEvent::token("Hello")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "token", "token": "Hello"}));
    }

    #[test]
    fn tool_start_shape() {
        let event = StreamEvent::ToolStart {
            id: "1".into(),
            tool: "calculator".into(),
            input: serde_json::json!({"expr": "2+2"}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_start");
        assert_eq!(json["tool"], "calculator");
        assert_eq!(json["input"]["expr"], "2+2");
    }

    #[test]
    fn unit_variants_have_only_a_type() {
        assert_eq!(
            serde_json::to_string(&StreamEvent::Connected).unwrap(),
            r#"{"type":"connected"}"#
        );
        assert_eq!(
            serde_json::to_string(&StreamEvent::Done).unwrap(),
            r#"{"type":"done"}"#
        );
    }

    #[test]
    fn error_deserializes() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"error","error":"boom"}"#).unwrap();
        assert_eq!(event, StreamEvent::error("boom"));
        assert!(event.is_terminal());
        assert_eq!(event.event_type(), "error");
    }

    #[test]
    fn only_done_and_error_are_terminal() {
        assert!(StreamEvent::Done.is_terminal());
        assert!(!StreamEvent::Connected.is_terminal());
        assert!(!StreamEvent::token("x").is_terminal());
    }
}
