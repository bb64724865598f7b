//! History Preparer: bounds and annotates the messages sent to the model.
//!
//! Runs before every reasoning pass over a copy of the run's messages:
//!
//! 1. Ensure the system instruction leads the list.
//! 2. Trim to the most recent window allowed by the [`TrimPolicy`]. System
//!    messages are always kept and the window always starts on a `user`
//!    message, so it never opens mid tool-exchange.
//! 3. Mark cache hints: the system instruction, the last message, and the
//!    second-most-recent `user` message.
//!
//! The caller's slice is never mutated.

use toolrelay_config::HistoryConfig;
use toolrelay_core::message::{Message, Role};
use tracing::{debug, warn};

use crate::token::estimate_message_tokens;

/// Trimming limits. Each is independent; `None` disables it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimPolicy {
    /// Non-system messages to keep.
    pub max_messages: Option<usize>,

    /// Estimated tokens to keep, system instruction included.
    pub max_tokens: Option<usize>,
}

impl TrimPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn max_messages(n: usize) -> Self {
        Self {
            max_messages: Some(n),
            max_tokens: None,
        }
    }

    pub fn max_tokens(n: usize) -> Self {
        Self {
            max_messages: None,
            max_tokens: Some(n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryPreparer {
    policy: TrimPolicy,
    cache_hints: bool,
    system_prompt: Option<String>,
}

impl HistoryPreparer {
    pub fn new(policy: TrimPolicy) -> Self {
        Self {
            policy,
            cache_hints: true,
            system_prompt: None,
        }
    }

    pub fn from_config(config: &HistoryConfig, system_prompt: impl Into<String>) -> Self {
        Self::new(TrimPolicy {
            max_messages: config.max_messages,
            max_tokens: config.max_tokens,
        })
        .with_cache_hints(config.cache_hints)
        .with_system_prompt(system_prompt)
    }

    /// Prepend this instruction when the history has no system message.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.is_empty()).then_some(prompt);
        self
    }

    pub fn with_cache_hints(mut self, enabled: bool) -> Self {
        self.cache_hints = enabled;
        self
    }

    pub fn policy(&self) -> TrimPolicy {
        self.policy
    }

    /// Produce the bounded, annotated history for one reasoning pass.
    pub fn prepare(&self, messages: &[Message]) -> Vec<Message> {
        let mut system: Vec<Message> = messages
            .iter()
            .filter(|m| m.role() == Role::System)
            .cloned()
            .collect();
        if system.is_empty()
            && let Some(prompt) = &self.system_prompt
        {
            system.push(Message::system(prompt.clone()));
        }

        let rest: Vec<&Message> = messages.iter().filter(|m| m.role() != Role::System).collect();
        let start = self.window_start(&system, &rest);

        let mut prepared = system;
        prepared.extend(rest[start..].iter().map(|m| (*m).clone()));

        for msg in &mut prepared {
            msg.cache_control = None;
        }
        if self.cache_hints {
            apply_cache_hints(&mut prepared);
        }

        debug!(
            input = messages.len(),
            kept = prepared.len(),
            "Prepared history"
        );
        prepared
    }

    /// Index into `rest` where the kept window begins.
    fn window_start(&self, system: &[Message], rest: &[&Message]) -> usize {
        let system_tokens: usize = system.iter().map(estimate_message_tokens).sum();
        let token_budget = self.policy.max_tokens.map(|t| t.saturating_sub(system_tokens));

        let mut start = rest.len();
        let mut tokens = 0usize;
        for (i, msg) in rest.iter().enumerate().rev() {
            if self.policy.max_messages.is_some_and(|max| rest.len() - i > max) {
                break;
            }
            let cost = estimate_message_tokens(msg);
            if token_budget.is_some_and(|budget| tokens + cost > budget) {
                break;
            }
            tokens += cost;
            start = i;
        }

        // Advance to the first user message inside the window.
        match rest[start..].iter().position(|m| m.role() == Role::User) {
            Some(offset) => start + offset,
            None => {
                // The budget cannot hold a full exchange. Keep the latest
                // question and everything after it rather than send none.
                let fallback = rest.iter().rposition(|m| m.role() == Role::User);
                if fallback.is_some() && start < rest.len() {
                    warn!(
                        max_messages = ?self.policy.max_messages,
                        max_tokens = ?self.policy.max_tokens,
                        "Trim budget smaller than the current exchange; keeping it whole"
                    );
                }
                fallback.unwrap_or(rest.len())
            }
        }
    }
}

/// Mark the system instruction, the last message, and the
/// second-most-recent user message as cache-eligible.
fn apply_cache_hints(messages: &mut [Message]) {
    for msg in messages.iter_mut().filter(|m| m.role() == Role::System) {
        msg.mark_cacheable();
    }

    if let Some(last) = messages.last_mut() {
        last.mark_cacheable();
    }

    if let Some(msg) = messages
        .iter_mut()
        .rev()
        .filter(|m| m.role() == Role::User)
        .nth(1)
    {
        msg.mark_cacheable();
    }
}
