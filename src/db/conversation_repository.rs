use chrono::Utc;
use sqlx::PgPool;
use tracing::error;

use crate::errors::AppError;
use crate::models::Conversation;

#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_all(&self) -> Result<Vec<Conversation>, AppError> {
        sqlx::query_as::<_, Conversation>(
            "SELECT id, title, created_at, updated_at FROM conversations ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch all conversations: {e}");
            AppError::db_query("Failed to fetch conversations", e)
        })
    }

    pub async fn exists(&self, id: i64) -> Result<bool, AppError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM conversations WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to look up conversation {id}: {e}");
                AppError::db_query(format!("Failed to find conversation {id}"), e)
            })
    }

    pub async fn insert(&self, title: &str) -> Result<i64, AppError> {
        let now = Utc::now();
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO conversations (title, created_at, updated_at)
             VALUES ($1, $2, $2)
             RETURNING id",
        )
        .bind(title)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create conversation: {e}");
            AppError::db_query("Failed to create conversation", e)
        })
    }

    pub async fn update_timestamp(&self, id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to update conversation timestamp {id}: {e}");
                AppError::db_query("Failed to update conversation", e)
            })?;
        Ok(())
    }
}
