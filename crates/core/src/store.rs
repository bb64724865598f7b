//! Chat store: the conversation history source and sink.
//!
//! A run reads the thread's stored history at start and writes exactly one
//! assistant message when it completes. Chats are owned by a user id; every
//! operation that names a chat checks ownership first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::{Message, ThreadId};

/// A chat (conversation thread) owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ThreadId,
    pub title: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_chat(&self, user_id: &str, title: &str) -> Result<Chat, StoreError>;

    /// Chats owned by `user_id`, oldest first.
    async fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>, StoreError>;

    /// Delete a chat and all of its messages.
    async fn delete_chat(&self, user_id: &str, chat_id: &ThreadId) -> Result<(), StoreError>;

    /// Return the chat if it exists and belongs to `user_id`.
    async fn authorize(&self, user_id: &str, chat_id: &ThreadId) -> Result<Chat, StoreError>;

    async fn append_message(&self, chat_id: &ThreadId, message: Message) -> Result<(), StoreError>;

    /// Messages of a chat in insertion order.
    async fn messages(&self, chat_id: &ThreadId) -> Result<Vec<Message>, StoreError>;
}
