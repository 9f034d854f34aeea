use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid slug: {0}")]
    InvalidSlug(String),
    #[error("invalid comment status: {0}")]
    InvalidCommentStatus(String),
    #[error("invalid queue status: {0}")]
    InvalidQueueStatus(String),
}
