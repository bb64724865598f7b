//! In-memory chat store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use toolrelay_core::error::StoreError;
use toolrelay_core::message::{Message, ThreadId};
use toolrelay_core::store::{Chat, ChatStore};
use tracing::debug;

struct ChatRecord {
    chat: Chat,
    messages: Vec<Message>,
}

/// Chats and their messages, held for the life of the process.
#[derive(Default)]
pub struct InMemoryChatStore {
    chats: RwLock<HashMap<ThreadId, ChatRecord>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_owner(record: &ChatRecord, user_id: &str) -> Result<(), StoreError> {
    if record.chat.user_id == user_id {
        Ok(())
    } else {
        Err(StoreError::Unauthorized {
            user_id: user_id.to_string(),
            chat_id: record.chat.id.to_string(),
        })
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn create_chat(&self, user_id: &str, title: &str) -> Result<Chat, StoreError> {
        let chat = Chat {
            id: ThreadId::new(),
            title: title.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        };
        debug!(chat_id = %chat.id, user_id, "Chat created");
        self.chats.write().await.insert(
            chat.id.clone(),
            ChatRecord {
                chat: chat.clone(),
                messages: Vec::new(),
            },
        );
        Ok(chat)
    }

    async fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>, StoreError> {
        let chats = self.chats.read().await;
        let mut owned: Vec<Chat> = chats
            .values()
            .filter(|r| r.chat.user_id == user_id)
            .map(|r| r.chat.clone())
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(owned)
    }

    async fn delete_chat(&self, user_id: &str, chat_id: &ThreadId) -> Result<(), StoreError> {
        let mut chats = self.chats.write().await;
        let record = chats
            .get(chat_id)
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))?;
        check_owner(record, user_id)?;
        chats.remove(chat_id);
        debug!(chat_id = %chat_id, "Chat deleted");
        Ok(())
    }

    async fn authorize(&self, user_id: &str, chat_id: &ThreadId) -> Result<Chat, StoreError> {
        let chats = self.chats.read().await;
        let record = chats
            .get(chat_id)
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))?;
        check_owner(record, user_id)?;
        Ok(record.chat.clone())
    }

    async fn append_message(&self, chat_id: &ThreadId, message: Message) -> Result<(), StoreError> {
        let mut chats = self.chats.write().await;
        let record = chats
            .get_mut(chat_id)
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))?;
        record.messages.push(message);
        Ok(())
    }

    async fn messages(&self, chat_id: &ThreadId) -> Result<Vec<Message>, StoreError> {
        let chats = self.chats.read().await;
        chats
            .get(chat_id)
            .map(|r| r.messages.clone())
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chats_are_scoped_to_their_owner() {
        let store = InMemoryChatStore::new();
        let alice = store.create_chat("alice", "math").await.unwrap();
        store.create_chat("bob", "poems").await.unwrap();

        let listed = store.list_chats("alice").await.unwrap();
        assert_eq!(listed, vec![alice.clone()]);

        assert!(store.authorize("alice", &alice.id).await.is_ok());
        let err = store.authorize("bob", &alice.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn messages_keep_order_and_content_verbatim() {
        let store = InMemoryChatStore::new();
        let chat = store.create_chat("alice", "t").await.unwrap();
        store.append_message(&chat.id, Message::user("q")).await.unwrap();
        store
            .append_message(&chat.id, Message::assistant("line one\nline two"))
            .await
            .unwrap();

        let messages = store.messages(&chat.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "line one\nline two");
    }

    #[tokio::test]
    async fn delete_removes_messages_and_checks_owner() {
        let store = InMemoryChatStore::new();
        let chat = store.create_chat("alice", "t").await.unwrap();
        store.append_message(&chat.id, Message::user("q")).await.unwrap();

        assert!(matches!(
            store.delete_chat("bob", &chat.id).await,
            Err(StoreError::Unauthorized { .. })
        ));
        store.delete_chat("alice", &chat.id).await.unwrap();
        assert!(matches!(store.messages(&chat.id).await, Err(StoreError::ChatNotFound(_))));
    }

    #[tokio::test]
    async fn append_to_missing_chat_fails() {
        let store = InMemoryChatStore::new();
        let err = store
            .append_message(&ThreadId::from("nope"), Message::user("q"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ChatNotFound(_)));
    }
}
