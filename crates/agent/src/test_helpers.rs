//! Shared test helpers: a scripted model, a few tools, a recording store.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use toolrelay_core::error::{ProviderError, StoreError, ToolError};
use toolrelay_core::message::{Message, ThreadId};
use toolrelay_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk,
};
use toolrelay_core::store::{Chat, ChatStore};
use toolrelay_core::tool::{Tool, ToolCall};

/// One scripted model reply.
#[derive(Debug, Clone)]
pub enum Turn {
    /// Stream these fragments, then finish without tool calls.
    Answer(Vec<String>),
    /// Stream optional text, then finish with these calls.
    ToolCalls { text: String, calls: Vec<ToolCall> },
    /// Stream these fragments, then break the stream.
    FailMidStream { fragments: Vec<String>, error: String },
    /// Refuse the request outright.
    Reject(String),
}

impl Turn {
    pub fn answer(fragments: &[&str]) -> Self {
        Turn::Answer(fragments.iter().map(|s| s.to_string()).collect())
    }

    pub fn tools(text: &str, calls: Vec<ToolCall>) -> Self {
        Turn::ToolCalls {
            text: text.to_string(),
            calls,
        }
    }

    pub fn fail_mid_stream(fragments: &[&str], error: &str) -> Self {
        Turn::FailMidStream {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            error: error.to_string(),
        }
    }
}

/// A provider that plays back one `Turn` per request and records requests.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_turn(&self, request: ProviderRequest) -> Result<Turn, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::NotConfigured("script exhausted".into()))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let message = match self.next_turn(request)? {
            Turn::Answer(fragments) => Message::assistant(fragments.concat()),
            Turn::ToolCalls { text, calls } => Message::assistant_with_tools(text, calls),
            Turn::FailMidStream { error, .. } => {
                return Err(ProviderError::StreamInterrupted(error));
            }
            Turn::Reject(message) => {
                return Err(ProviderError::ApiError {
                    status_code: 500,
                    message,
                });
            }
        };
        Ok(ProviderResponse {
            message,
            usage: None,
            model: "scripted".into(),
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let turn = self.next_turn(request)?;
        let (tx, rx) = mpsc::channel(64);

        match turn {
            Turn::Answer(fragments) => {
                for f in fragments {
                    tx.try_send(Ok(StreamChunk::text(f))).unwrap();
                }
                tx.try_send(Ok(StreamChunk::finished(vec![]))).unwrap();
            }
            Turn::ToolCalls { text, calls } => {
                if !text.is_empty() {
                    tx.try_send(Ok(StreamChunk::text(text))).unwrap();
                }
                tx.try_send(Ok(StreamChunk::finished(calls))).unwrap();
            }
            Turn::FailMidStream { fragments, error } => {
                for f in fragments {
                    tx.try_send(Ok(StreamChunk::text(f))).unwrap();
                }
                tx.try_send(Err(ProviderError::StreamInterrupted(error))).unwrap();
            }
            Turn::Reject(message) => {
                return Err(ProviderError::ApiError {
                    status_code: 500,
                    message,
                });
            }
        }
        Ok(rx)
    }
}

/// Returns its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the text argument"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        Ok(serde_json::Value::String(
            arguments["text"].as_str().unwrap_or_default().to_string(),
        ))
    }
}

/// Always fails.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }

    fn description(&self) -> &str {
        "A tool whose backend is down"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "failing".into(),
            reason: "backend unavailable".into(),
        })
    }
}

/// Sleeps before answering "done".
pub struct SlowTool {
    name: String,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Answers after a delay"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::json!("done"))
    }
}

/// Records appended messages; can be told to fail writes.
#[derive(Default)]
pub struct RecordingChatStore {
    appended: Mutex<Vec<(ThreadId, Message)>>,
    fail_writes: bool,
}

impl RecordingChatStore {
    pub fn failing() -> Self {
        Self {
            appended: Mutex::new(Vec::new()),
            fail_writes: true,
        }
    }

    pub fn appended(&self) -> Vec<(ThreadId, Message)> {
        self.appended.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatStore for RecordingChatStore {
    async fn create_chat(&self, user_id: &str, title: &str) -> Result<Chat, StoreError> {
        Ok(Chat {
            id: ThreadId::new(),
            title: title.to_string(),
            user_id: user_id.to_string(),
            created_at: chrono::Utc::now(),
        })
    }

    async fn list_chats(&self, _user_id: &str) -> Result<Vec<Chat>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete_chat(&self, _user_id: &str, chat_id: &ThreadId) -> Result<(), StoreError> {
        Err(StoreError::ChatNotFound(chat_id.to_string()))
    }

    async fn authorize(&self, _user_id: &str, chat_id: &ThreadId) -> Result<Chat, StoreError> {
        Err(StoreError::ChatNotFound(chat_id.to_string()))
    }

    async fn append_message(&self, chat_id: &ThreadId, message: Message) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Storage("disk full".into()));
        }
        self.appended.lock().unwrap().push((chat_id.clone(), message));
        Ok(())
    }

    async fn messages(&self, chat_id: &ThreadId) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .appended()
            .into_iter()
            .filter(|(id, _)| id == chat_id)
            .map(|(_, m)| m)
            .collect())
    }
}
