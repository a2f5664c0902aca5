pub mod conversation_repository;
pub mod message_repository;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::errors::AppError;
use crate::models::{Conversation, Message, MessageRole, MessageStatus};

use self::conversation_repository::ConversationRepository;
use self::message_repository::MessageRepository;

/// Persistence operations the chat pipeline depends on.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_conversation(&self, title: &str) -> Result<i64, AppError>;

    async fn conversation_exists(&self, id: i64) -> Result<bool, AppError>;

    /// Touches `updated_at` so recently used conversations list first.
    async fn touch_conversation(&self, id: i64) -> Result<(), AppError>;

    /// Stores a finished user turn. User messages are born `completed`.
    async fn save_user_message(&self, conversation_id: i64, content: &str)
        -> Result<i64, AppError>;

    /// Creates an empty message in `pending`.
    async fn create_message(&self, conversation_id: i64, role: MessageRole)
        -> Result<i64, AppError>;

    async fn append_content(&self, message_id: i64, delta: &str) -> Result<(), AppError>;

    async fn save_thinking(&self, message_id: i64, thinking: &str) -> Result<(), AppError>;

    async fn set_status(&self, message_id: i64, status: MessageStatus) -> Result<(), AppError>;

    async fn list_conversations(&self) -> Result<Vec<Conversation>, AppError>;

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, AppError>;
}

/// [`ChatStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgChatStore {
    conversations: ConversationRepository,
    messages: MessageRepository,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            conversations: ConversationRepository::new(pool.clone()),
            messages: MessageRepository::new(pool),
        }
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn create_conversation(&self, title: &str) -> Result<i64, AppError> {
        self.conversations.insert(title).await
    }

    async fn conversation_exists(&self, id: i64) -> Result<bool, AppError> {
        self.conversations.exists(id).await
    }

    async fn touch_conversation(&self, id: i64) -> Result<(), AppError> {
        self.conversations.update_timestamp(id).await
    }

    async fn save_user_message(
        &self,
        conversation_id: i64,
        content: &str,
    ) -> Result<i64, AppError> {
        self.messages
            .insert(conversation_id, MessageRole::User, content, MessageStatus::Completed)
            .await
    }

    async fn create_message(
        &self,
        conversation_id: i64,
        role: MessageRole,
    ) -> Result<i64, AppError> {
        self.messages
            .insert(conversation_id, role, "", MessageStatus::Pending)
            .await
    }

    async fn append_content(&self, message_id: i64, delta: &str) -> Result<(), AppError> {
        self.messages.append_content(message_id, delta).await
    }

    async fn save_thinking(&self, message_id: i64, thinking: &str) -> Result<(), AppError> {
        self.messages.set_thinking(message_id, thinking).await
    }

    async fn set_status(&self, message_id: i64, status: MessageStatus) -> Result<(), AppError> {
        self.messages.set_status(message_id, status).await
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, AppError> {
        self.conversations.find_all().await
    }

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, AppError> {
        self.messages.find_by_conversation_id(conversation_id).await
    }
}
