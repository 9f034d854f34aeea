use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use porchlight_core::domain::newsletter::ContentItem;
use porchlight_core::types::slug::Slug;

#[derive(Debug, Error)]
pub enum PostsRepoError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

pub async fn find_blog_post(pool: &PgPool, id: Uuid) -> Result<Option<ContentItem>, PostsRepoError> {
    let row = sqlx::query(
        r#"
        SELECT id, slug, title, author, published_at, excerpt, body_html, cover_image_url
        FROM blog_posts
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let slug: String = row.try_get("slug")?;
    let slug = Slug::try_from(slug).map_err(|err| PostsRepoError::InvalidRow(err.to_string()))?;
    Ok(Some(ContentItem {
        id: row.try_get("id")?,
        slug,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        published_at: row.try_get("published_at")?,
        excerpt: row.try_get("excerpt")?,
        body_html: row.try_get("body_html")?,
        cover_image_url: row.try_get("cover_image_url")?,
    }))
}
