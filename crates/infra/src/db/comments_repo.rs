use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use porchlight_core::domain::comments::{CommentStatus, StoredComment};
use porchlight_core::services::gatekeeper::{CommentStore, CommentStoreError};

#[derive(Debug, Error)]
pub enum CommentsRepoError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

impl From<CommentsRepoError> for CommentStoreError {
    fn from(err: CommentsRepoError) -> Self {
        CommentStoreError::Storage(err.to_string())
    }
}

/// Postgres-backed store for the comment gatekeeper.
#[derive(Debug, Clone)]
pub struct PgCommentStore {
    pool: PgPool,
}

impl PgCommentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommentStore for PgCommentStore {
    async fn insert_comment(&self, comment: &StoredComment) -> Result<(), CommentStoreError> {
        Ok(insert_comment(&self.pool, comment).await?)
    }

    async fn count_by_ip_since(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, CommentStoreError> {
        Ok(count_comments_by_ip_since(&self.pool, ip_address, since).await?)
    }

    async fn exists_duplicate_since(
        &self,
        content: &str,
        author_email: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, CommentStoreError> {
        Ok(has_duplicate_comment_since(&self.pool, content, author_email, since).await?)
    }

    async fn find_comment_post(&self, comment_id: Uuid) -> Result<Option<String>, CommentStoreError> {
        Ok(find_comment_post_id(&self.pool, comment_id).await?)
    }
}

pub async fn insert_comment(pool: &PgPool, comment: &StoredComment) -> Result<(), CommentsRepoError> {
    sqlx::query(
        r#"
        INSERT INTO comments (
            id,
            post_id,
            author_name,
            author_email,
            content,
            parent_comment_id,
            status,
            spam_score,
            ip_address,
            user_agent,
            created_at,
            updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(comment.id)
    .bind(&comment.post_id)
    .bind(&comment.author_name)
    .bind(&comment.author_email)
    .bind(&comment.content)
    .bind(comment.parent_comment_id)
    .bind(comment.status.as_str())
    .bind(comment.spam_score)
    .bind(&comment.ip_address)
    .bind(&comment.user_agent)
    .bind(comment.created_at)
    .bind(comment.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn count_comments_by_ip_since(
    pool: &PgPool,
    ip_address: &str,
    since: DateTime<Utc>,
) -> Result<i64, CommentsRepoError> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS count
        FROM comments
        WHERE ip_address = $1 AND created_at >= $2
        "#,
    )
    .bind(ip_address)
    .bind(since)
    .fetch_one(pool)
    .await?;
    let count: i64 = row.try_get("count")?;
    Ok(count)
}

pub async fn has_duplicate_comment_since(
    pool: &PgPool,
    content: &str,
    author_email: &str,
    since: DateTime<Utc>,
) -> Result<bool, CommentsRepoError> {
    let row = sqlx::query(
        r#"
        SELECT 1
        FROM comments
        WHERE content = $1 AND author_email = $2 AND created_at >= $3
        LIMIT 1
        "#,
    )
    .bind(content)
    .bind(author_email)
    .bind(since)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn find_comment_post_id(
    pool: &PgPool,
    comment_id: Uuid,
) -> Result<Option<String>, CommentsRepoError> {
    let row = sqlx::query(
        r#"
        SELECT post_id
        FROM comments
        WHERE id = $1
        "#,
    )
    .bind(comment_id)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(Some(row.try_get("post_id")?)),
        None => Ok(None),
    }
}

/// Approved comments of a post, oldest first.
pub async fn list_approved_comments(
    pool: &PgPool,
    post_id: &str,
) -> Result<Vec<StoredComment>, CommentsRepoError> {
    let rows = sqlx::query(
        r#"
        SELECT id,
               post_id,
               author_name,
               author_email,
               content,
               parent_comment_id,
               status,
               spam_score,
               ip_address,
               user_agent,
               created_at,
               updated_at
        FROM comments
        WHERE post_id = $1 AND status = $2
        ORDER BY created_at ASC
        "#,
    )
    .bind(post_id)
    .bind(CommentStatus::Approved.as_str())
    .fetch_all(pool)
    .await?;
    let mut comments = Vec::with_capacity(rows.len());
    for row in rows {
        comments.push(map_comment(row)?);
    }
    Ok(comments)
}

fn map_comment(row: sqlx::postgres::PgRow) -> Result<StoredComment, CommentsRepoError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<CommentStatus>()
        .map_err(|err| CommentsRepoError::InvalidRow(err.to_string()))?;
    Ok(StoredComment {
        id: row.try_get("id")?,
        post_id: row.try_get("post_id")?,
        author_name: row.try_get("author_name")?,
        author_email: row.try_get("author_email")?,
        content: row.try_get("content")?,
        parent_comment_id: row.try_get("parent_comment_id")?,
        status,
        spam_score: row.try_get("spam_score")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
