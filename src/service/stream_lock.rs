use std::sync::Arc;

use dashmap::DashSet;

use crate::errors::AppError;

/// Tracks which conversations currently have a reply streaming.
#[derive(Clone, Default)]
pub struct StreamLocks {
    active: Arc<DashSet<i64>>,
}

impl StreamLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, conversation_id: i64) -> Result<StreamLease, AppError> {
        if !self.active.insert(conversation_id) {
            return Err(AppError::ConcurrentStreamConflict { conversation_id });
        }
        Ok(StreamLease { conversation_id, active: Arc::clone(&self.active) })
    }

    #[cfg(test)]
    pub fn is_active(&self, conversation_id: i64) -> bool {
        self.active.contains(&conversation_id)
    }
}

/// Exclusive right to stream into one conversation. Released on drop.
#[derive(Debug)]
pub struct StreamLease {
    conversation_id: i64,
    active: Arc<DashSet<i64>>,
}

impl StreamLease {
    pub fn conversation_id(&self) -> i64 {
        self.conversation_id
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.active.remove(&self.conversation_id);
    }
}
