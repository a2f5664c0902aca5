use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::error;

use crate::errors::AppError;
use crate::models::{Message, MessageRole, MessageStatus};

#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_conversation_id(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, thinking, status, created_at, updated_at
             FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch messages for conversation {conversation_id}: {e}");
            AppError::db_query(
                format!("Failed to fetch messages for conversation {conversation_id}"),
                e,
            )
        })?;

        rows.iter().map(message_from_row).collect()
    }

    pub async fn insert(
        &self,
        conversation_id: i64,
        role: MessageRole,
        content: &str,
        status: MessageStatus,
    ) -> Result<i64, AppError> {
        let now = Utc::now();
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO messages (conversation_id, role, content, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)
             RETURNING id",
        )
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(status.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save {role} message in conversation {conversation_id}: {e}");
            AppError::db_query("Failed to save message", e)
        })
    }

    /// Appends to the stored body; existing text is never rewritten.
    pub async fn append_content(&self, id: i64, delta: &str) -> Result<(), AppError> {
        self.execute_update(
            "UPDATE messages SET content = content || $1, updated_at = $2 WHERE id = $3",
            id,
            delta,
            "append content to",
        )
        .await
    }

    pub async fn set_thinking(&self, id: i64, thinking: &str) -> Result<(), AppError> {
        self.execute_update(
            "UPDATE messages SET thinking = $1, updated_at = $2 WHERE id = $3",
            id,
            thinking,
            "store thinking for",
        )
        .await
    }

    pub async fn set_status(&self, id: i64, status: MessageStatus) -> Result<(), AppError> {
        self.execute_update(
            "UPDATE messages SET status = $1, updated_at = $2 WHERE id = $3",
            id,
            status.as_str(),
            "update status of",
        )
        .await
    }

    async fn execute_update(
        &self,
        sql: &str,
        id: i64,
        value: &str,
        action: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(sql)
            .bind(value)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to {action} message {id}: {e}");
                AppError::db_query(format!("Failed to {action} message"), e)
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::RecordNotFound { entity_type: "message".to_string(), id });
        }
        Ok(())
    }
}

fn message_from_row(row: &PgRow) -> Result<Message, AppError> {
    let role_str: String = row
        .try_get("role")
        .map_err(|e| AppError::db_query("Failed to read role", e))?;
    let role = MessageRole::try_from(role_str)
        .map_err(|e| AppError::Unexpected(format!("Unknown message role: {e}")))?;
    let status_str: String = row
        .try_get("status")
        .map_err(|e| AppError::db_query("Failed to read status", e))?;
    let status = MessageStatus::try_from(status_str)
        .map_err(|e| AppError::Unexpected(format!("Unknown message status: {e}")))?;

    Ok(Message {
        id: row.try_get("id").map_err(|e| AppError::db_query("Failed to read id", e))?,
        conversation_id: row
            .try_get("conversation_id")
            .map_err(|e| AppError::db_query("Failed to read conversation_id", e))?,
        role,
        content: row
            .try_get("content")
            .map_err(|e| AppError::db_query("Failed to read content", e))?,
        thinking: row
            .try_get("thinking")
            .map_err(|e| AppError::db_query("Failed to read thinking", e))?,
        status,
        created_at: row
            .try_get("created_at")
            .map_err(|e| AppError::db_query("Failed to read created_at", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| AppError::db_query("Failed to read updated_at", e))?,
    })
}
