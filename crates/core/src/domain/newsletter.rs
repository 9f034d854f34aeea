use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::slug::Slug;

/// A published blog post that can be turned into a newsletter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub slug: Slug,
    pub title: String,
    pub author: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub body_html: String,
    #[serde(default)]
    pub cover_image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Sending => "sending",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(QueueStatus::Pending),
            "sending" => Ok(QueueStatus::Sending),
            "sent" => Ok(QueueStatus::Sent),
            "failed" => Ok(QueueStatus::Failed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            other => Err(CoreError::InvalidQueueStatus(other.to_string())),
        }
    }
}

/// Provider-issued broadcast identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BroadcastId(pub String);

impl BroadcastId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsletterQueueItem {
    pub id: Uuid,
    pub post_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub status: QueueStatus,
    pub broadcast_id: Option<BroadcastId>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NewsletterQueueItem {
    /// Whether a schedule or send-now may act on this record without risking a
    /// second broadcast for the same post.
    pub fn accepts_dispatch(&self) -> bool {
        match self.status {
            QueueStatus::Pending => self.broadcast_id.is_none(),
            QueueStatus::Failed => true,
            QueueStatus::Sending | QueueStatus::Sent | QueueStatus::Cancelled => false,
        }
    }

    pub fn can_cancel(&self) -> bool {
        self.status == QueueStatus::Pending && self.broadcast_id.is_none()
    }
}

/// State change applied to a queue record after talking to the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueTransition {
    Scheduled { broadcast_id: BroadcastId },
    /// Broadcast exists at the provider but has not been published yet.
    Sending { broadcast_id: BroadcastId },
    Sent { broadcast_id: BroadcastId, sent_at: DateTime<Utc> },
    Failed { error_message: String },
}

impl QueueTransition {
    pub fn status(&self) -> QueueStatus {
        match self {
            QueueTransition::Scheduled { .. } => QueueStatus::Pending,
            QueueTransition::Sending { .. } => QueueStatus::Sending,
            QueueTransition::Sent { .. } => QueueStatus::Sent,
            QueueTransition::Failed { .. } => QueueStatus::Failed,
        }
    }
}

/// How a newsletter should leave the building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DispatchMode {
    /// One recipient, sent immediately.
    Test { to: String },
    /// Private broadcast left at the provider for review.
    Draft,
    /// Public broadcast the provider sends at `send_at`.
    Schedule { send_at: DateTime<Utc> },
    SendNow,
}

impl DispatchMode {
    pub fn name(&self) -> &'static str {
        match self {
            DispatchMode::Test { .. } => "test",
            DispatchMode::Draft => "draft",
            DispatchMode::Schedule { .. } => "schedule",
            DispatchMode::SendNow => "send_now",
        }
    }

    /// Only schedule and send-now move a queue record.
    pub fn tracks_queue(&self) -> bool {
        matches!(self, DispatchMode::Schedule { .. } | DispatchMode::SendNow)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReceipt {
    pub broadcast_id: BroadcastId,
    pub scheduled: bool,
}
