use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use porchlight_core::domain::newsletter::{
    BroadcastId, NewsletterQueueItem, QueueStatus, QueueTransition,
};
use porchlight_core::services::dispatcher::{QueueStore, QueueStoreError};

const MAX_LIST_LIMIT: i64 = 200;

#[derive(Debug, Error)]
pub enum NewsletterRepoError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

impl From<NewsletterRepoError> for QueueStoreError {
    fn from(err: NewsletterRepoError) -> Self {
        QueueStoreError::Storage(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PgNewsletterQueue {
    pool: PgPool,
}

impl PgNewsletterQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for PgNewsletterQueue {
    async fn find_queue_item(&self, id: Uuid) -> Result<Option<NewsletterQueueItem>, QueueStoreError> {
        Ok(find_queue_item(&self.pool, id).await?)
    }

    async fn claim_for_dispatch(&self, id: Uuid) -> Result<bool, QueueStoreError> {
        Ok(claim_queue_item(&self.pool, id).await?)
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        transition: &QueueTransition,
    ) -> Result<(), QueueStoreError> {
        Ok(apply_queue_transition(&self.pool, id, transition).await?)
    }
}

pub async fn insert_queue_item(
    pool: &PgPool,
    post_id: Uuid,
    scheduled_for: DateTime<Utc>,
) -> Result<NewsletterQueueItem, NewsletterRepoError> {
    let row = sqlx::query(
        r#"
        INSERT INTO newsletter_queue (id, post_id, scheduled_for, status)
        VALUES ($1, $2, $3, $4)
        RETURNING id, post_id, scheduled_for, status, broadcast_id, error_message, sent_at, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(post_id)
    .bind(scheduled_for)
    .bind(QueueStatus::Pending.as_str())
    .fetch_one(pool)
    .await?;
    map_queue_item(row)
}

pub async fn find_queue_item(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<NewsletterQueueItem>, NewsletterRepoError> {
    let row = sqlx::query(
        r#"
        SELECT id, post_id, scheduled_for, status, broadcast_id, error_message, sent_at, created_at
        FROM newsletter_queue
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(map_queue_item).transpose()
}

pub async fn list_queue_items(
    pool: &PgPool,
    status: Option<QueueStatus>,
    limit: i64,
) -> Result<Vec<NewsletterQueueItem>, NewsletterRepoError> {
    let rows = sqlx::query(
        r#"
        SELECT id, post_id, scheduled_for, status, broadcast_id, error_message, sent_at, created_at
        FROM newsletter_queue
        WHERE ($1::TEXT IS NULL OR status = $1)
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(status.map(QueueStatus::as_str))
    .bind(limit.clamp(1, MAX_LIST_LIMIT))
    .fetch_all(pool)
    .await?;
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(map_queue_item(row)?);
    }
    Ok(items)
}

/// Cancels a record the provider has not seen yet. Returns false when nothing matched.
pub async fn cancel_queue_item(pool: &PgPool, id: Uuid) -> Result<bool, NewsletterRepoError> {
    let result = sqlx::query(
        r#"
        UPDATE newsletter_queue
        SET status = $2
        WHERE id = $1 AND status = $3 AND broadcast_id IS NULL
        "#,
    )
    .bind(id)
    .bind(QueueStatus::Cancelled.as_str())
    .bind(QueueStatus::Pending.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Marks the record `sending` if it still accepts a dispatch. The row lock
/// taken by the UPDATE lets only one concurrent caller win.
pub async fn claim_queue_item(pool: &PgPool, id: Uuid) -> Result<bool, NewsletterRepoError> {
    let result = sqlx::query(
        r#"
        UPDATE newsletter_queue
        SET status = $2
        WHERE id = $1
          AND ((status = $3 AND broadcast_id IS NULL) OR status = $4)
        "#,
    )
    .bind(id)
    .bind(QueueStatus::Sending.as_str())
    .bind(QueueStatus::Pending.as_str())
    .bind(QueueStatus::Failed.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn apply_queue_transition(
    pool: &PgPool,
    id: Uuid,
    transition: &QueueTransition,
) -> Result<(), NewsletterRepoError> {
    let (broadcast_id, error_message, sent_at) = match transition {
        QueueTransition::Scheduled { broadcast_id } | QueueTransition::Sending { broadcast_id } => {
            (Some(broadcast_id.as_str()), None, None)
        }
        QueueTransition::Sent {
            broadcast_id,
            sent_at,
        } => (Some(broadcast_id.as_str()), None, Some(*sent_at)),
        QueueTransition::Failed { error_message } => (None, Some(error_message.as_str()), None),
    };
    sqlx::query(
        r#"
        UPDATE newsletter_queue
        SET status = $2,
            broadcast_id = COALESCE($3, broadcast_id),
            error_message = $4,
            sent_at = COALESCE($5, sent_at)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(transition.status().as_str())
    .bind(broadcast_id)
    .bind(error_message)
    .bind(sent_at)
    .execute(pool)
    .await?;
    Ok(())
}

fn map_queue_item(row: sqlx::postgres::PgRow) -> Result<NewsletterQueueItem, NewsletterRepoError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<QueueStatus>()
        .map_err(|err| NewsletterRepoError::InvalidRow(err.to_string()))?;
    let broadcast_id: Option<String> = row.try_get("broadcast_id")?;
    Ok(NewsletterQueueItem {
        id: row.try_get("id")?,
        post_id: row.try_get("post_id")?,
        scheduled_for: row.try_get("scheduled_for")?,
        status,
        broadcast_id: broadcast_id.map(BroadcastId),
        error_message: row.try_get("error_message")?,
        sent_at: row.try_get("sent_at")?,
        created_at: row.try_get("created_at")?,
    })
}
