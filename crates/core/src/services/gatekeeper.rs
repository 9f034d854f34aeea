// Comment gatekeeper: validates a reader submission, scores it, and stores it
// with a moderation status. Pure domain logic; storage sits behind CommentStore.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::comments::{
    CommentSubmission, RejectReason, StoredComment, SubmitOutcome, MAX_CONTENT_CHARS,
};
use crate::domain::spam::{self, SpamInput};

#[derive(Debug, Error)]
pub enum CommentStoreError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Persistence the gatekeeper needs: one insert plus a few lookups.
#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn insert_comment(&self, comment: &StoredComment) -> Result<(), CommentStoreError>;

    async fn count_by_ip_since(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, CommentStoreError>;

    async fn exists_duplicate_since(
        &self,
        content: &str,
        author_email: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, CommentStoreError>;

    /// Post the comment belongs to, if it exists.
    async fn find_comment_post(&self, comment_id: Uuid) -> Result<Option<String>, CommentStoreError>;
}

#[derive(Debug, Clone, Copy)]
pub struct GatekeeperLimits {
    pub max_per_ip: i64,
    pub rate_window: Duration,
    pub duplicate_window: Duration,
}

impl Default for GatekeeperLimits {
    fn default() -> Self {
        Self {
            max_per_ip: 3,
            rate_window: Duration::minutes(60),
            duplicate_window: Duration::hours(24),
        }
    }
}

pub struct CommentGatekeeper<S: CommentStore, C: Clock> {
    store: S,
    clock: C,
    limits: GatekeeperLimits,
}

impl<S: CommentStore, C: Clock> CommentGatekeeper<S, C> {
    pub fn new(store: S, clock: C, limits: GatekeeperLimits) -> Self {
        Self {
            store,
            clock,
            limits,
        }
    }

    /// Runs the checks in order and stores the comment if none of them reject it.
    ///
    /// Rejections are an `Ok` outcome; only storage failures are errors.
    pub async fn submit(
        &self,
        submission: CommentSubmission,
    ) -> Result<SubmitOutcome, CommentStoreError> {
        if submission
            .honeypot
            .as_deref()
            .is_some_and(|value| !value.is_empty())
        {
            return Ok(self.reject(&submission, RejectReason::SpamHoneypot));
        }

        let post_id = submission.post_id.trim();
        let author_name = submission.author_name.trim();
        let author_email = submission.author_email.trim();
        let content = submission.content.trim();
        if post_id.is_empty() || author_name.is_empty() || author_email.is_empty() || content.is_empty() {
            return Ok(self.reject(&submission, RejectReason::InvalidInput));
        }
        // measured on the submitted text, padding included
        if submission.content.chars().count() > MAX_CONTENT_CHARS {
            return Ok(self.reject(&submission, RejectReason::ContentTooLong));
        }
        if !is_valid_email(author_email) {
            return Ok(self.reject(&submission, RejectReason::InvalidEmail));
        }

        if let Some(parent_id) = submission.parent_comment_id {
            let parent_post = self.store.find_comment_post(parent_id).await?;
            if parent_post.as_deref() != Some(post_id) {
                return Ok(self.reject(&submission, RejectReason::InvalidParent));
            }
        }

        let now = self.clock.now();
        let recent = self
            .store
            .count_by_ip_since(&submission.ip_address, now - self.limits.rate_window)
            .await?;
        if recent >= self.limits.max_per_ip {
            return Ok(self.reject(&submission, RejectReason::RateLimited));
        }
        if self
            .store
            .exists_duplicate_since(content, author_email, now - self.limits.duplicate_window)
            .await?
        {
            return Ok(self.reject(&submission, RejectReason::Duplicate));
        }

        let report = spam::score(SpamInput {
            content,
            author_email,
            time_to_submit_secs: submission.time_to_submit_secs,
        });
        let status = report.score.classify();
        debug!(signals = ?report.signals, "comment spam signals");

        let comment = StoredComment {
            id: Uuid::new_v4(),
            post_id: post_id.to_string(),
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
            content: content.to_string(),
            parent_comment_id: submission.parent_comment_id,
            status,
            spam_score: report.score.value(),
            ip_address: submission.ip_address.clone(),
            user_agent: submission.user_agent.clone(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_comment(&comment).await?;
        info!(
            comment_id = %comment.id,
            post_id = %comment.post_id,
            status = %comment.status,
            spam_score = comment.spam_score,
            "comment stored"
        );
        Ok(SubmitOutcome::from_stored(comment))
    }

    fn reject(&self, submission: &CommentSubmission, reason: RejectReason) -> SubmitOutcome {
        info!(
            reason = %reason,
            post_id = %submission.post_id,
            ip = %submission.ip_address,
            "comment rejected"
        );
        SubmitOutcome::Rejected(reason)
    }
}

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"));

/// Single `@`, no whitespace, and a dot inside the domain with text on both sides.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}
