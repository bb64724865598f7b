//! Request bodies shared by the gateway and the stream client.

use serde::{Deserialize, Serialize};
use toolrelay_core::message::{Message, Role};

/// `POST /api/chat/stream`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamRequest {
    /// Prior conversation. When absent, the stored chat history is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<HistoryEntry>>,

    pub new_message: String,

    pub chat_id: String,
}

/// One `{role, content}` entry of client-supplied history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    /// Tool exchanges are not replayed from client history; only user and
    /// assistant turns become messages.
    pub fn into_message(self) -> Option<Message> {
        match self.role {
            Role::User => Some(Message::user(self.content)),
            Role::Assistant => Some(Message::assistant(self.content)),
            Role::System => Some(Message::system(self.content)),
            Role::Tool => None,
        }
    }
}

/// `POST /api/chats`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub title: Option<String>,
}
