use std::sync::Arc;

use tracing::{error, warn};

use crate::db::ChatStore;
use crate::errors::AppError;
use crate::models::{MessageRole, MessageStatus, StreamEvent};
use crate::service::classifier::Classified;
use crate::service::observer::PipelineObserver;
use crate::service::stream_lock::StreamLease;

const SAVE_FAILED: &str = "Could not save the reply";

/// Sole writer of one assistant message's status and content for the
/// duration of a chat request.
///
/// Text is buffered in memory while streaming and written once on the
/// terminal event, so a failed reply still keeps everything received so far.
pub struct MessageLifecycleTracker {
    store: Arc<dyn ChatStore>,
    observer: Arc<dyn PipelineObserver>,
    conversation_id: i64,
    message_id: i64,
    status: MessageStatus,
    content: String,
    thinking: String,
    persist_thinking: bool,
    lease: Option<StreamLease>,
}

impl MessageLifecycleTracker {
    /// Creates the assistant message in `pending`. The lease is held until
    /// the message reaches a terminal status.
    pub async fn begin(
        store: Arc<dyn ChatStore>,
        observer: Arc<dyn PipelineObserver>,
        lease: StreamLease,
        persist_thinking: bool,
    ) -> Result<Self, AppError> {
        let conversation_id = lease.conversation_id();
        let message_id = store.create_message(conversation_id, MessageRole::Assistant).await?;
        observer.on_status(message_id, MessageStatus::Pending);

        Ok(Self {
            store,
            observer,
            conversation_id,
            message_id,
            status: MessageStatus::Pending,
            content: String::new(),
            thinking: String::new(),
            persist_thinking,
            lease: Some(lease),
        })
    }

    pub fn message_id(&self) -> i64 {
        self.message_id
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Applies one classified event. Returns the outbound event, or `None`
    /// once the message is terminal.
    pub async fn apply(&mut self, event: Classified) -> Option<StreamEvent> {
        if self.status.is_terminal() {
            return None;
        }

        if self.status == MessageStatus::Pending {
            if let Err(e) = self.store.set_status(self.message_id, MessageStatus::Streaming).await {
                error!("Could not mark message {} as streaming: {e}", self.message_id);
                return Some(self.fail(SAVE_FAILED.to_string()).await);
            }
            self.advance(MessageStatus::Streaming);
        }

        match event {
            Classified::Thinking(text) => {
                self.thinking.push_str(&text);
                Some(StreamEvent::Thinking(text))
            }
            Classified::Content(text) => {
                self.content.push_str(&text);
                Some(StreamEvent::Content(text))
            }
            Classified::Finished => Some(self.complete().await),
            Classified::Failed(cause) => Some(self.fail(cause).await),
        }
    }

    async fn complete(&mut self) -> StreamEvent {
        if let Err(e) = self.flush().await {
            error!("Could not store reply for message {}: {e}", self.message_id);
            return self.finish(MessageStatus::Failed, Some(SAVE_FAILED.to_string())).await;
        }
        self.finish(MessageStatus::Completed, None).await
    }

    async fn fail(&mut self, cause: String) -> StreamEvent {
        if let Err(e) = self.flush().await {
            error!("Could not keep partial reply for message {}: {e}", self.message_id);
        }
        self.finish(MessageStatus::Failed, Some(cause)).await
    }

    async fn flush(&mut self) -> Result<(), AppError> {
        if !self.content.is_empty() {
            self.store.append_content(self.message_id, &self.content).await?;
        }
        if self.persist_thinking && !self.thinking.is_empty() {
            if let Err(e) = self.store.save_thinking(self.message_id, &self.thinking).await {
                warn!("Could not store thinking for message {}: {e}", self.message_id);
            }
        }
        Ok(())
    }

    async fn finish(&mut self, status: MessageStatus, cause: Option<String>) -> StreamEvent {
        // A failed write on an earlier step can land here while still pending.
        if self.status == MessageStatus::Pending {
            self.advance(MessageStatus::Streaming);
        }
        let (status, cause) = match self.store.set_status(self.message_id, status).await {
            Ok(()) => (status, cause),
            Err(e) if status == MessageStatus::Completed => {
                error!("Could not mark message {} as completed: {e}", self.message_id);
                if let Err(e) = self.store.set_status(self.message_id, MessageStatus::Failed).await {
                    error!("Could not mark message {} as failed either: {e}", self.message_id);
                }
                (MessageStatus::Failed, Some(SAVE_FAILED.to_string()))
            }
            Err(e) => {
                error!("Could not mark message {} as {status}: {e}", self.message_id);
                (status, cause)
            }
        };
        if let Err(e) = self.store.touch_conversation(self.conversation_id).await {
            warn!("Could not bump conversation {}: {e}", self.conversation_id);
        }
        self.advance(status);
        self.lease.take();

        match cause {
            None => StreamEvent::Done { message_id: self.message_id },
            Some(message) => StreamEvent::Error { message_id: Some(self.message_id), message },
        }
    }

    fn advance(&mut self, next: MessageStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal transition {} -> {next}",
            self.status
        );
        self.status = next;
        self.observer.on_status(self.message_id, next);
    }
}
