//! Agent Step: one streamed reasoning pass over the prepared history.

use std::sync::Arc;

use tokio::sync::mpsc;
use toolrelay_core::error::ProviderError;
use toolrelay_core::message::Message;
use toolrelay_core::provider::{Provider, ProviderRequest, ToolDefinition, Usage};
use toolrelay_core::tool::ToolCall;
use tracing::{debug, trace};

use crate::translator::LoopEvent;

/// Why a reasoning pass produced no message.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Backend(#[from] ProviderError),

    #[error("client disconnected")]
    Disconnected,
}

/// Model settings shared by every pass of a run.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

#[derive(Clone)]
pub struct AgentStep {
    provider: Arc<dyn Provider>,
    settings: ModelSettings,
    tools: Vec<ToolDefinition>,
}

/// The assistant message a pass produced, plus what it cost.
#[derive(Debug)]
pub struct StepOutput {
    pub message: Message,
    pub usage: Option<Usage>,
}

impl AgentStep {
    pub fn new(
        provider: Arc<dyn Provider>,
        settings: ModelSettings,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            provider,
            settings,
            tools,
        }
    }

    /// Stream one pass. Text fragments go out on `events` as they arrive;
    /// the returned assistant message carries the full text and any tool
    /// calls. A model failure at any point fails the pass.
    pub async fn run(
        &self,
        history: Vec<Message>,
        events: &mpsc::Sender<LoopEvent>,
    ) -> Result<StepOutput, StepError> {
        let request = ProviderRequest {
            model: self.settings.model.clone(),
            messages: history,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            tools: self.tools.clone(),
        };

        debug!(
            provider = self.provider.name(),
            model = %request.model,
            messages = request.messages.len(),
            "Starting reasoning pass"
        );
        let mut chunks = self.provider.stream(request).await?;

        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut usage = None;

        loop {
            let Some(chunk) = chunks.recv().await else {
                let cut = ProviderError::StreamInterrupted(
                    "model stream ended before completion".into(),
                );
                return Err(cut.into());
            };
            let chunk = chunk?;

            if let Some(text) = chunk.content
                && !text.is_empty()
            {
                trace!(len = text.len(), "Model fragment");
                content.push_str(&text);
                events
                    .send(LoopEvent::Fragment(text))
                    .await
                    .map_err(|_| StepError::Disconnected)?;
            }

            for call in chunk.tool_calls {
                match tool_calls.iter_mut().find(|c| c.id == call.id) {
                    Some(existing) => *existing = call,
                    None => tool_calls.push(call),
                }
            }

            if chunk.usage.is_some() {
                usage = chunk.usage;
            }

            if chunk.done {
                break;
            }
        }

        Ok(StepOutput {
            message: Message::assistant_with_tools(content, tool_calls),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, Turn};

    fn step(provider: ScriptedProvider) -> AgentStep {
        AgentStep::new(
            Arc::new(provider),
            ModelSettings {
                model: "scripted".into(),
                temperature: 0.0,
                max_tokens: Some(256),
            },
            vec![],
        )
    }

    #[tokio::test]
    async fn collects_fragments_into_one_message() {
        let step = step(ScriptedProvider::new(vec![Turn::answer(&["Hel", "lo"])]));
        let (tx, mut rx) = mpsc::channel(8);

        let out = step.run(vec![Message::user("hi")], &tx).await.unwrap();
        assert_eq!(out.message.content, "Hello");
        assert!(out.message.tool_calls.is_empty());

        assert!(matches!(rx.recv().await, Some(LoopEvent::Fragment(t)) if t == "Hel"));
        assert!(matches!(rx.recv().await, Some(LoopEvent::Fragment(t)) if t == "lo"));
    }

    #[tokio::test]
    async fn tool_calls_arrive_with_the_final_chunk() {
        let call = ToolCall::new("1", "calculator", serde_json::json!({"expr": "2+2"}));
        let step = step(ScriptedProvider::new(vec![Turn::tools("", vec![call.clone()])]));
        let (tx, _rx) = mpsc::channel(8);

        let out = step.run(vec![Message::user("2+2?")], &tx).await.unwrap();
        assert_eq!(out.message.content, "");
        assert_eq!(out.message.tool_calls, vec![call]);
    }

    #[tokio::test]
    async fn mid_stream_failure_fails_the_pass() {
        let turn = Turn::fail_mid_stream(&["partial"], "connection reset");
        let step = step(ScriptedProvider::new(vec![turn]));
        let (tx, _rx) = mpsc::channel(8);

        let err = step.run(vec![Message::user("hi")], &tx).await.unwrap_err();
        assert!(matches!(err, StepError::Backend(ProviderError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn closed_event_channel_is_a_disconnect() {
        let step = step(ScriptedProvider::new(vec![Turn::answer(&["ignored"])]));
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let err = step.run(vec![Message::user("hi")], &tx).await.unwrap_err();
        assert!(matches!(err, StepError::Disconnected));
    }

    #[tokio::test]
    async fn request_carries_settings_and_history() {
        let provider = Arc::new(ScriptedProvider::new(vec![Turn::answer(&["ok"])]));
        let step = AgentStep::new(
            provider.clone(),
            ModelSettings {
                model: "claude-test".into(),
                temperature: 0.2,
                max_tokens: None,
            },
            vec![],
        );
        let (tx, _rx) = mpsc::channel(8);
        step.run(vec![Message::system("sys"), Message::user("hi")], &tx).await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "claude-test");
        assert_eq!(requests[0].messages.len(), 2);
    }
}
