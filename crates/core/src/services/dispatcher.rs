// Newsletter dispatcher: renders a post into a broadcast, hands it to the email
// provider in one of four modes, and records what happened on the queue row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::email_content::{self, EmailContent, EmailTemplate};
use crate::domain::newsletter::{
    BroadcastId, ContentItem, DispatchMode, DispatchReceipt, NewsletterQueueItem, QueueStatus,
    QueueTransition,
};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("provider unreachable: {0}")]
    Transport(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum QueueStoreError {
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("broadcast creation failed: {0}")]
    Create(#[source] ProviderError),
    #[error("broadcast {broadcast_id} created but publish failed: {source}")]
    Publish {
        broadcast_id: BroadcastId,
        #[source]
        source: ProviderError,
    },
    #[error("queue item {0} not found")]
    QueueNotFound(Uuid),
    #[error("queue item {id} is {status} and cannot be dispatched")]
    QueueClosed { id: Uuid, status: QueueStatus },
    #[error("queue error: {0}")]
    Queue(#[from] QueueStoreError),
}

/// A broadcast ready to be created at the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastRequest {
    pub subject: String,
    pub description: String,
    pub preview_text: String,
    pub content_html: String,
    pub public: bool,
    pub send_at: Option<DateTime<Utc>>,
    /// Restricts delivery to this one address.
    pub recipient: Option<String>,
}

#[async_trait]
pub trait BroadcastProvider: Send + Sync {
    async fn create_broadcast(&self, request: &BroadcastRequest) -> Result<BroadcastId, ProviderError>;

    async fn publish_broadcast(&self, broadcast_id: &BroadcastId) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn find_queue_item(&self, id: Uuid) -> Result<Option<NewsletterQueueItem>, QueueStoreError>;

    /// Atomically moves a record that accepts dispatch into `sending`.
    /// Returns false when the record is missing or another dispatch owns it.
    async fn claim_for_dispatch(&self, id: Uuid) -> Result<bool, QueueStoreError>;

    async fn apply_transition(
        &self,
        id: Uuid,
        transition: &QueueTransition,
    ) -> Result<(), QueueStoreError>;
}

pub struct NewsletterDispatcher<P: BroadcastProvider, Q: QueueStore, C: Clock> {
    provider: P,
    queue: Q,
    clock: C,
    template: EmailTemplate,
}

impl<P: BroadcastProvider, Q: QueueStore, C: Clock> NewsletterDispatcher<P, Q, C> {
    pub fn new(provider: P, queue: Q, clock: C, template: EmailTemplate) -> Self {
        Self {
            provider,
            queue,
            clock,
            template,
        }
    }

    pub async fn dispatch(
        &self,
        item: &ContentItem,
        mode: DispatchMode,
        queue_id: Option<Uuid>,
    ) -> Result<DispatchReceipt, DispatchError> {
        // test and draft never read or touch the queue
        let queue_id = if mode.tracks_queue() { queue_id } else { None };
        if let Some(id) = queue_id {
            if !self.queue.claim_for_dispatch(id).await? {
                let record = self
                    .queue
                    .find_queue_item(id)
                    .await?
                    .ok_or(DispatchError::QueueNotFound(id))?;
                return Err(DispatchError::QueueClosed {
                    id,
                    status: record.status,
                });
            }
        }

        let content = email_content::render(item, &self.template);
        let request = build_request(item, &content, &mode);
        let broadcast_id = match self.provider.create_broadcast(&request).await {
            Ok(id) => id,
            Err(err) => {
                warn!(post_id = %item.id, mode = mode.name(), error = %err, "broadcast creation failed");
                if let Some(id) = queue_id {
                    let failed = QueueTransition::Failed {
                        error_message: err.to_string(),
                    };
                    if let Err(queue_err) = self.queue.apply_transition(id, &failed).await {
                        error!(queue_id = %id, error = %queue_err, "failed to record queue failure");
                    }
                }
                return Err(DispatchError::Create(err));
            }
        };
        info!(post_id = %item.id, mode = mode.name(), %broadcast_id, "broadcast created");

        match mode {
            DispatchMode::Draft => Ok(DispatchReceipt {
                broadcast_id,
                scheduled: false,
            }),
            DispatchMode::Test { .. } => {
                self.publish(&broadcast_id, None).await?;
                Ok(DispatchReceipt {
                    broadcast_id,
                    scheduled: false,
                })
            }
            DispatchMode::Schedule { .. } => {
                if let Some(id) = queue_id {
                    let scheduled = QueueTransition::Scheduled {
                        broadcast_id: broadcast_id.clone(),
                    };
                    self.queue.apply_transition(id, &scheduled).await?;
                }
                Ok(DispatchReceipt {
                    broadcast_id,
                    scheduled: true,
                })
            }
            DispatchMode::SendNow => {
                if let Some(id) = queue_id {
                    let sending = QueueTransition::Sending {
                        broadcast_id: broadcast_id.clone(),
                    };
                    self.queue.apply_transition(id, &sending).await?;
                }
                self.publish(&broadcast_id, queue_id).await?;
                if let Some(id) = queue_id {
                    let sent = QueueTransition::Sent {
                        broadcast_id: broadcast_id.clone(),
                        sent_at: self.clock.now(),
                    };
                    self.queue.apply_transition(id, &sent).await?;
                }
                Ok(DispatchReceipt {
                    broadcast_id,
                    scheduled: false,
                })
            }
        }
    }

    async fn publish(
        &self,
        broadcast_id: &BroadcastId,
        queue_id: Option<Uuid>,
    ) -> Result<(), DispatchError> {
        if let Err(err) = self.provider.publish_broadcast(broadcast_id).await {
            // the broadcast stays at the provider; the queue row (if any) stays in `sending`
            warn!(
                %broadcast_id,
                queue_id = ?queue_id,
                error = %err,
                "broadcast created but not published; needs operator follow-up"
            );
            return Err(DispatchError::Publish {
                broadcast_id: broadcast_id.clone(),
                source: err,
            });
        }
        info!(%broadcast_id, "broadcast published");
        Ok(())
    }
}

fn build_request(item: &ContentItem, content: &EmailContent, mode: &DispatchMode) -> BroadcastRequest {
    let (public, send_at, recipient) = match mode {
        DispatchMode::Test { to } => (false, None, Some(to.trim().to_string())),
        DispatchMode::Draft => (false, None, None),
        DispatchMode::Schedule { send_at } => (true, Some(*send_at), None),
        DispatchMode::SendNow => (true, None, None),
    };
    let description = match mode {
        DispatchMode::Test { .. } => format!("[TEST] Newsletter: {}", item.title),
        _ => format!("Newsletter: {}", item.title),
    };
    BroadcastRequest {
        subject: content.subject.clone(),
        description,
        preview_text: content.preview_text.clone(),
        content_html: content.html.clone(),
        public,
        send_at,
        recipient,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::clock::FixedClock;
    use crate::types::slug::Slug;

    #[derive(Default)]
    struct FakeProvider {
        created: Mutex<Vec<BroadcastRequest>>,
        published: Mutex<Vec<BroadcastId>>,
        fail_create: bool,
        fail_publish: bool,
    }

    #[async_trait]
    impl<'a> BroadcastProvider for &'a FakeProvider {
        async fn create_broadcast(
            &self,
            request: &BroadcastRequest,
        ) -> Result<BroadcastId, ProviderError> {
            if self.fail_create {
                return Err(ProviderError::Rejected {
                    status: 422,
                    message: "Subject can't be blank".to_string(),
                });
            }
            let mut created = self.created.lock().unwrap();
            created.push(request.clone());
            Ok(BroadcastId(format!("b{}", created.len())))
        }

        async fn publish_broadcast(&self, broadcast_id: &BroadcastId) -> Result<(), ProviderError> {
            if self.fail_publish {
                return Err(ProviderError::Transport("timed out".to_string()));
            }
            self.published.lock().unwrap().push(broadcast_id.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryQueue {
        items: Mutex<HashMap<Uuid, NewsletterQueueItem>>,
    }

    impl MemoryQueue {
        fn with_item(item: NewsletterQueueItem) -> Self {
            let queue = MemoryQueue::default();
            queue.items.lock().unwrap().insert(item.id, item);
            queue
        }

        fn get(&self, id: Uuid) -> NewsletterQueueItem {
            self.items.lock().unwrap().get(&id).cloned().unwrap()
        }
    }

    #[async_trait]
    impl<'a> QueueStore for &'a MemoryQueue {
        async fn find_queue_item(
            &self,
            id: Uuid,
        ) -> Result<Option<NewsletterQueueItem>, QueueStoreError> {
            Ok(self.items.lock().unwrap().get(&id).cloned())
        }

        async fn claim_for_dispatch(&self, id: Uuid) -> Result<bool, QueueStoreError> {
            let mut items = self.items.lock().unwrap();
            match items.get_mut(&id) {
                Some(item) if item.accepts_dispatch() => {
                    item.status = QueueStatus::Sending;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn apply_transition(
            &self,
            id: Uuid,
            transition: &QueueTransition,
        ) -> Result<(), QueueStoreError> {
            let mut items = self.items.lock().unwrap();
            let item = items
                .get_mut(&id)
                .ok_or_else(|| QueueStoreError::Storage("missing row".to_string()))?;
            item.status = transition.status();
            match transition {
                QueueTransition::Scheduled { broadcast_id }
                | QueueTransition::Sending { broadcast_id } => {
                    item.broadcast_id = Some(broadcast_id.clone());
                }
                QueueTransition::Sent {
                    broadcast_id,
                    sent_at,
                } => {
                    item.broadcast_id = Some(broadcast_id.clone());
                    item.sent_at = Some(*sent_at);
                }
                QueueTransition::Failed { error_message } => {
                    item.error_message = Some(error_message.clone());
                }
            }
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn post() -> ContentItem {
        ContentItem {
            id: Uuid::from_u128(1),
            slug: Slug::try_from("deep-work").unwrap(),
            title: "Deep Work".to_string(),
            author: "Alex".to_string(),
            published_at: now(),
            excerpt: Some("Focus is a skill.".to_string()),
            body_html: "<p>Focus is a skill.</p>".to_string(),
            cover_image_url: None,
        }
    }

    fn pending_item() -> NewsletterQueueItem {
        NewsletterQueueItem {
            id: Uuid::from_u128(9),
            post_id: Uuid::from_u128(1),
            scheduled_for: now() + Duration::days(1),
            status: QueueStatus::Pending,
            broadcast_id: None,
            error_message: None,
            sent_at: None,
            created_at: now(),
        }
    }

    fn template() -> EmailTemplate {
        EmailTemplate {
            site_url: "https://example.com".to_string(),
            cta_label: "Read more".to_string(),
            tagline: "See you next week.".to_string(),
        }
    }

    fn dispatcher<'a>(
        provider: &'a FakeProvider,
        queue: &'a MemoryQueue,
    ) -> NewsletterDispatcher<&'a FakeProvider, &'a MemoryQueue, FixedClock> {
        NewsletterDispatcher::new(provider, queue, FixedClock(now()), template())
    }

    #[tokio::test]
    async fn test_mode_targets_one_recipient_and_publishes() {
        let provider = FakeProvider::default();
        let queue = MemoryQueue::with_item(pending_item());
        let receipt = dispatcher(&provider, &queue)
            .dispatch(
                &post(),
                DispatchMode::Test {
                    to: "editor@example.com".to_string(),
                },
                Some(pending_item().id),
            )
            .await
            .unwrap();
        assert!(!receipt.scheduled);
        let created = provider.created.lock().unwrap();
        assert_eq!(created[0].recipient.as_deref(), Some("editor@example.com"));
        assert!(!created[0].public);
        assert_eq!(provider.published.lock().unwrap().len(), 1);
        assert_eq!(queue.get(pending_item().id), pending_item());
    }

    #[tokio::test]
    async fn draft_never_publishes_or_touches_queue() {
        let provider = FakeProvider::default();
        let queue = MemoryQueue::with_item(pending_item());
        let receipt = dispatcher(&provider, &queue)
            .dispatch(&post(), DispatchMode::Draft, Some(pending_item().id))
            .await
            .unwrap();
        assert_eq!(receipt.broadcast_id, BroadcastId("b1".to_string()));
        assert!(provider.published.lock().unwrap().is_empty());
        assert!(!provider.created.lock().unwrap()[0].public);
        assert_eq!(queue.get(pending_item().id).status, QueueStatus::Pending);
    }

    #[tokio::test]
    async fn schedule_sets_pending_with_broadcast_and_skips_publish() {
        let provider = FakeProvider::default();
        let queue = MemoryQueue::with_item(pending_item());
        let send_at = now() + Duration::hours(6);
        let receipt = dispatcher(&provider, &queue)
            .dispatch(&post(), DispatchMode::Schedule { send_at }, Some(pending_item().id))
            .await
            .unwrap();
        assert!(receipt.scheduled);
        let record = queue.get(pending_item().id);
        assert_eq!(record.status, QueueStatus::Pending);
        assert_eq!(record.broadcast_id, Some(receipt.broadcast_id));
        assert!(provider.published.lock().unwrap().is_empty());
        let created = provider.created.lock().unwrap();
        assert!(created[0].public);
        assert_eq!(created[0].send_at, Some(send_at));
    }

    #[tokio::test]
    async fn send_now_marks_sent_and_publishes_once() {
        let provider = FakeProvider::default();
        let queue = MemoryQueue::with_item(pending_item());
        let receipt = dispatcher(&provider, &queue)
            .dispatch(&post(), DispatchMode::SendNow, Some(pending_item().id))
            .await
            .unwrap();
        let record = queue.get(pending_item().id);
        assert_eq!(record.status, QueueStatus::Sent);
        assert_eq!(record.broadcast_id, Some(receipt.broadcast_id.clone()));
        assert_eq!(record.sent_at, Some(now()));
        assert_eq!(*provider.published.lock().unwrap(), vec![receipt.broadcast_id]);
        let created = provider.created.lock().unwrap();
        assert!(created[0].public);
        assert_eq!(created[0].send_at, None);
        assert!(created[0].content_html.contains("https://example.com/blog/deep-work"));
    }

    #[tokio::test]
    async fn create_failure_marks_queue_failed() {
        let provider = FakeProvider {
            fail_create: true,
            ..Default::default()
        };
        let queue = MemoryQueue::with_item(pending_item());
        let err = dispatcher(&provider, &queue)
            .dispatch(&post(), DispatchMode::SendNow, Some(pending_item().id))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Create(_)));
        let record = queue.get(pending_item().id);
        assert_eq!(record.status, QueueStatus::Failed);
        assert!(record.error_message.unwrap().contains("Subject can't be blank"));
        assert!(record.broadcast_id.is_none());
    }

    #[tokio::test]
    async fn publish_failure_leaves_record_sending() {
        let provider = FakeProvider {
            fail_publish: true,
            ..Default::default()
        };
        let queue = MemoryQueue::with_item(pending_item());
        let err = dispatcher(&provider, &queue)
            .dispatch(&post(), DispatchMode::SendNow, Some(pending_item().id))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Publish { .. }));
        let record = queue.get(pending_item().id);
        assert_eq!(record.status, QueueStatus::Sending);
        assert_eq!(record.broadcast_id, Some(BroadcastId("b1".to_string())));
        assert!(record.sent_at.is_none());
    }

    #[tokio::test]
    async fn sent_record_is_not_dispatched_again() {
        let provider = FakeProvider::default();
        let mut item = pending_item();
        item.status = QueueStatus::Sent;
        item.broadcast_id = Some(BroadcastId("old".to_string()));
        let queue = MemoryQueue::with_item(item);
        let err = dispatcher(&provider, &queue)
            .dispatch(&post(), DispatchMode::SendNow, Some(pending_item().id))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::QueueClosed { status: QueueStatus::Sent, .. }));
        assert!(provider.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn overlapping_send_now_creates_one_broadcast() {
        let provider = FakeProvider::default();
        let queue = MemoryQueue::with_item(pending_item());
        let first = dispatcher(&provider, &queue);
        let second = dispatcher(&provider, &queue);
        let (post_a, post_b) = (post(), post());
        let (a, b) = tokio::join!(
            first.dispatch(&post_a, DispatchMode::SendNow, Some(pending_item().id)),
            second.dispatch(&post_b, DispatchMode::SendNow, Some(pending_item().id)),
        );
        assert_eq!([&a, &b].iter().filter(|result| result.is_ok()).count(), 1);
        let refused = if a.is_err() { a } else { b };
        assert!(matches!(refused, Err(DispatchError::QueueClosed { .. })));
        assert_eq!(provider.created.lock().unwrap().len(), 1);
        assert_eq!(provider.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claimed_record_refuses_second_dispatch() {
        let provider = FakeProvider::default();
        let queue = MemoryQueue::with_item(pending_item());
        assert!((&queue).claim_for_dispatch(pending_item().id).await.unwrap());
        assert!(!(&queue).claim_for_dispatch(pending_item().id).await.unwrap());

        let err = dispatcher(&provider, &queue)
            .dispatch(
                &post(),
                DispatchMode::Schedule {
                    send_at: now() + Duration::hours(2),
                },
                Some(pending_item().id),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::QueueClosed { status: QueueStatus::Sending, .. }));
        assert!(provider.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_queue_item_is_an_error() {
        let provider = FakeProvider::default();
        let queue = MemoryQueue::default();
        let err = dispatcher(&provider, &queue)
            .dispatch(&post(), DispatchMode::SendNow, Some(Uuid::from_u128(77)))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::QueueNotFound(_)));
    }

    #[tokio::test]
    async fn send_now_without_queue_still_publishes() {
        let provider = FakeProvider::default();
        let queue = MemoryQueue::default();
        dispatcher(&provider, &queue)
            .dispatch(&post(), DispatchMode::SendNow, None)
            .await
            .unwrap();
        assert_eq!(provider.published.lock().unwrap().len(), 1);
    }
}
