use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

pub const MAX_CONTENT_CHARS: usize = 2000;

/// A reader's comment as posted by the form, before any checks.
#[derive(Debug, Clone, Default)]
pub struct CommentSubmission {
    pub post_id: String,
    pub author_name: String,
    pub author_email: String,
    pub content: String,
    pub parent_comment_id: Option<Uuid>,
    pub honeypot: Option<String>,
    pub time_to_submit_secs: Option<f64>,
    pub ip_address: String,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentStatus {
    Approved,
    Pending,
    Spam,
}

impl CommentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommentStatus::Approved => "approved",
            CommentStatus::Pending => "pending",
            CommentStatus::Spam => "spam",
        }
    }
}

impl fmt::Display for CommentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommentStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "approved" => Ok(CommentStatus::Approved),
            "pending" => Ok(CommentStatus::Pending),
            "spam" => Ok(CommentStatus::Spam),
            other => Err(CoreError::InvalidCommentStatus(other.to_string())),
        }
    }
}

/// A comment row as persisted. `spam_score` never changes after insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredComment {
    pub id: Uuid,
    pub post_id: String,
    pub author_name: String,
    #[serde(skip_serializing)]
    pub author_email: String,
    pub content: String,
    pub parent_comment_id: Option<Uuid>,
    pub status: CommentStatus,
    pub spam_score: f64,
    #[serde(skip_serializing)]
    pub ip_address: String,
    #[serde(skip_serializing)]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why a submission was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    SpamHoneypot,
    InvalidInput,
    ContentTooLong,
    InvalidEmail,
    InvalidParent,
    RateLimited,
    Duplicate,
    SpamScore,
}

impl RejectReason {
    pub fn code(self) -> &'static str {
        match self {
            RejectReason::SpamHoneypot => "spam-honeypot",
            RejectReason::InvalidInput => "invalid-input",
            RejectReason::ContentTooLong => "content-too-long",
            RejectReason::InvalidEmail => "invalid-email",
            RejectReason::InvalidParent => "invalid-parent",
            RejectReason::RateLimited => "rate-limited",
            RejectReason::Duplicate => "duplicate",
            RejectReason::SpamScore => "spam-score",
        }
    }

    /// Reader-facing text. Abuse reasons stay vague on purpose.
    pub fn message(self) -> &'static str {
        match self {
            RejectReason::SpamHoneypot => "Invalid submission",
            RejectReason::InvalidInput => "Missing required fields",
            RejectReason::ContentTooLong => "Comment is too long (max 2000 characters)",
            RejectReason::InvalidEmail => "Invalid email address",
            RejectReason::InvalidParent => "Reply target not found",
            RejectReason::RateLimited => "Too many comments. Please try again later.",
            RejectReason::Duplicate => "Duplicate comment detected",
            RejectReason::SpamScore => "Comment submitted for moderation",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accepted,
    Held,
    Rejected,
}

/// Result of running a submission through the gatekeeper.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted(StoredComment),
    Held(StoredComment),
    /// Stored with status `spam` for later review but hidden from readers.
    Flagged(StoredComment),
    Rejected(RejectReason),
}

impl SubmitOutcome {
    pub fn from_stored(comment: StoredComment) -> Self {
        match comment.status {
            CommentStatus::Approved => SubmitOutcome::Accepted(comment),
            CommentStatus::Pending => SubmitOutcome::Held(comment),
            CommentStatus::Spam => SubmitOutcome::Flagged(comment),
        }
    }

    pub fn decision(&self) -> Decision {
        match self {
            SubmitOutcome::Accepted(_) => Decision::Accepted,
            SubmitOutcome::Held(_) => Decision::Held,
            SubmitOutcome::Flagged(_) | SubmitOutcome::Rejected(_) => Decision::Rejected,
        }
    }

    pub fn comment(&self) -> Option<&StoredComment> {
        match self {
            SubmitOutcome::Accepted(comment)
            | SubmitOutcome::Held(comment)
            | SubmitOutcome::Flagged(comment) => Some(comment),
            SubmitOutcome::Rejected(_) => None,
        }
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            SubmitOutcome::Flagged(_) => Some(RejectReason::SpamScore),
            SubmitOutcome::Rejected(reason) => Some(*reason),
            SubmitOutcome::Accepted(_) | SubmitOutcome::Held(_) => None,
        }
    }
}

/// Reader-facing view of an approved comment.
#[derive(Debug, Clone, Serialize)]
pub struct PublicComment {
    pub id: Uuid,
    pub author_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub replies: Vec<PublicComment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentThread {
    pub post_id: String,
    pub total: usize,
    pub comments: Vec<PublicComment>,
}
