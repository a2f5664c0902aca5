//! In-memory [`ChatStore`] used by the pipeline tests. Records every status
//! write so tests can assert on the exact lifecycle a message went through.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::ChatStore;
use crate::errors::AppError;
use crate::models::{Conversation, Message, MessageRole, MessageStatus};

#[derive(Default)]
pub struct MemoryChatStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    status_history: Vec<(i64, MessageStatus)>,
    rejected_status: Option<MessageStatus>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn message_mut(&mut self, id: i64) -> Result<&mut Message, AppError> {
        self.messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| AppError::RecordNotFound { entity_type: "message".to_string(), id })
    }
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(&self, id: i64) -> Option<Message> {
        let state = self.state.lock().unwrap();
        state.messages.iter().find(|m| m.id == id).cloned()
    }

    /// Every status written for `id`, starting with the status it was created in.
    pub fn statuses(&self, id: i64) -> Vec<MessageStatus> {
        let state = self.state.lock().unwrap();
        state
            .status_history
            .iter()
            .filter(|(message_id, _)| *message_id == id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Makes every later write of `status` fail, as a lost database would.
    pub fn reject_status(&self, status: MessageStatus) {
        self.state.lock().unwrap().rejected_status = Some(status);
    }

    pub fn conversation_count(&self) -> usize {
        self.state.lock().unwrap().conversations.len()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn create_conversation(&self, title: &str) -> Result<i64, AppError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let now = Utc::now();
        state.conversations.push(Conversation {
            id,
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn conversation_exists(&self, id: i64) -> Result<bool, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.conversations.iter().any(|c| c.id == id))
    }

    async fn touch_conversation(&self, id: i64) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(AppError::ConversationNotFound { id })?;
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn save_user_message(
        &self,
        conversation_id: i64,
        content: &str,
    ) -> Result<i64, AppError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let now = Utc::now();
        state.messages.push(Message {
            id,
            conversation_id,
            role: MessageRole::User,
            content: content.to_string(),
            thinking: None,
            status: MessageStatus::Completed,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn create_message(
        &self,
        conversation_id: i64,
        role: MessageRole,
    ) -> Result<i64, AppError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let now = Utc::now();
        state.messages.push(Message {
            id,
            conversation_id,
            role,
            content: String::new(),
            thinking: None,
            status: MessageStatus::Pending,
            created_at: now,
            updated_at: now,
        });
        state.status_history.push((id, MessageStatus::Pending));
        Ok(id)
    }

    async fn append_content(&self, message_id: i64, delta: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.message_mut(message_id)?.content.push_str(delta);
        Ok(())
    }

    async fn save_thinking(&self, message_id: i64, thinking: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.message_mut(message_id)?.thinking = Some(thinking.to_string());
        Ok(())
    }

    async fn set_status(&self, message_id: i64, status: MessageStatus) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if state.rejected_status == Some(status) {
            return Err(AppError::Unexpected(format!("status {status} rejected")));
        }
        state.message_mut(message_id)?.status = status;
        state.status_history.push((message_id, status));
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, AppError> {
        let state = self.state.lock().unwrap();
        let mut conversations = state.conversations.clone();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}
