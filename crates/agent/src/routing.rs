//! Loop routing: the orchestration state machine's transition function.

use toolrelay_core::message::{Message, Role};
use toolrelay_core::tool::ToolCall;

/// Where the orchestration loop goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Run a reasoning pass.
    Agent,
    /// Resolve the pending tool-call batch.
    Tools,
    /// The run is finished.
    Terminal,
}

/// Decide the next state from the last message and the pending calls.
///
/// Priority: pending calls → `Tools`; a trailing `tool` message with
/// content → `Agent`; anything else → `Terminal`.
pub fn next_state(last_message: Option<&Message>, pending_tool_calls: &[ToolCall]) -> State {
    if !pending_tool_calls.is_empty() {
        return State::Tools;
    }

    match last_message {
        Some(msg) if msg.role() == Role::Tool && !msg.content.is_empty() => State::Agent,
        _ => State::Terminal,
    }
}
