use tokio::sync::mpsc;

use crate::models::{ChunkKind, StreamChunk, StreamEvent};

/// Maps one pipeline event onto its wire chunk.
pub fn encode(event: &StreamEvent) -> StreamChunk {
    let chunk = |kind| StreamChunk { kind, content: None, conversation_id: None, message_id: None };

    match event {
        StreamEvent::ConversationCreated(id) => StreamChunk {
            conversation_id: Some(*id),
            ..chunk(ChunkKind::Conversation)
        },
        StreamEvent::MessageCreated(id) => StreamChunk {
            message_id: Some(*id),
            ..chunk(ChunkKind::Message)
        },
        StreamEvent::Thinking(text) => StreamChunk {
            content: Some(text.clone()),
            ..chunk(ChunkKind::Thinking)
        },
        StreamEvent::Content(text) => StreamChunk {
            content: Some(text.clone()),
            ..chunk(ChunkKind::Content)
        },
        StreamEvent::Done { message_id } => StreamChunk {
            message_id: Some(*message_id),
            ..chunk(ChunkKind::Done)
        },
        StreamEvent::Error { message_id, message } => StreamChunk {
            content: Some(message.clone()),
            message_id: *message_id,
            ..chunk(ChunkKind::Error)
        },
    }
}

/// Writes encoded events to the outbound channel in order and closes it
/// right after the terminal event.
pub struct ResponseStreamEncoder {
    tx: Option<mpsc::Sender<StreamChunk>>,
}

impl ResponseStreamEncoder {
    pub fn new(tx: mpsc::Sender<StreamChunk>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Returns `false` when the event could not be delivered, either because
    /// the stream was already terminated or the receiver has gone away.
    pub async fn emit(&mut self, event: &StreamEvent) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        let delivered = tx.send(encode(event)).await.is_ok();
        if event.is_terminal() {
            self.tx = None;
        }
        delivered
    }
}
