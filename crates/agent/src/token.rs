//! Token estimation for the `max_tokens` trimming policy.
//!
//! Character heuristic: ~4 characters per token, rounded up. Close enough
//! for BPE tokenizers on English text; the budget is a guard, not a bill.

use toolrelay_core::message::Message;

/// Per-message overhead for role markers and delimiters.
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for one message, including tool-call arguments.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|tc| estimate_tokens(&tc.name) + estimate_tokens(&tc.arguments.to_string()))
        .sum();
    MESSAGE_OVERHEAD + estimate_tokens(&message.content) + calls
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
