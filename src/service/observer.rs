use tracing::{debug, info, warn};

use crate::models::{MessageStatus, StreamEvent};

/// Hook for watching a chat pipeline run without touching its control flow.
pub trait PipelineObserver: Send + Sync {
    fn on_prompt_ready(&self, _message_id: i64, _augmented: bool) {}

    fn on_status(&self, _message_id: i64, _status: MessageStatus) {}

    fn on_event(&self, _event: &StreamEvent) {}
}

/// Observer that writes pipeline progress to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_prompt_ready(&self, message_id: i64, augmented: bool) {
        debug!(message_id, augmented, "prompt ready");
    }

    fn on_status(&self, message_id: i64, status: MessageStatus) {
        debug!(message_id, %status, "message status changed");
    }

    fn on_event(&self, event: &StreamEvent) {
        match event {
            StreamEvent::ConversationCreated(id) => info!(conversation_id = id, "conversation created"),
            StreamEvent::MessageCreated(id) => debug!(message_id = id, "assistant message created"),
            StreamEvent::Done { message_id } => info!(message_id, "reply completed"),
            StreamEvent::Error { message_id, message } => {
                warn!(?message_id, "reply failed: {message}")
            }
            StreamEvent::Thinking(_) | StreamEvent::Content(_) => {}
        }
    }
}
