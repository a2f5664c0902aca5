use thiserror::Error;

/// Top-level application error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Database errors ──────────────────────────────────────────────────────
    #[error("Database query failed: {message}")]
    DatabaseQueryFailed {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Record not found: {entity_type} with id '{id}'")]
    RecordNotFound { entity_type: String, id: i64 },

    // ── Completion service errors ────────────────────────────────────────────
    // Shown to the client as-is. Upstream bodies and transport details are only logged.
    #[error("Could not reach the completion service")]
    UpstreamConnection,

    #[error("Completion service returned HTTP {status}")]
    UpstreamHttp { status: u16 },

    #[error("Completion service sent nothing for {seconds}s")]
    CompletionTimeout { seconds: u64 },

    #[error("Request cancelled by the client")]
    Cancelled,

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    // ── Conversation errors ──────────────────────────────────────────────────
    #[error("Conversation '{id}' not found")]
    ConversationNotFound { id: i64 },

    #[error("Conversation '{conversation_id}' already has a reply in progress")]
    ConcurrentStreamConflict { conversation_id: i64 },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn db_query(message: impl Into<String>, source: sqlx::Error) -> Self {
        AppError::DatabaseQueryFailed { message: message.into(), source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::ConversationNotFound { .. } | AppError::RecordNotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::EmptyField { .. } | AppError::FieldTooLong { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::ConcurrentStreamConflict { .. })
    }
}

/// Failures of the web-search call. Never surfaced to callers; the prompt
/// augmenter logs them and falls back to the raw question.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("search request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("search service returned HTTP {0}")]
    Status(u16),

    #[error("search service returned code {code}: {message}")]
    Api { code: i64, message: String },

    #[error("search response could not be parsed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("search returned no results")]
    Empty,
}
