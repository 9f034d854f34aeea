use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::state::AppState;
use porchlight_core::clock::SystemClock;
use porchlight_core::domain::newsletter::{
    BroadcastId, ContentItem, DispatchMode, NewsletterQueueItem, QueueStatus, QueueTransition,
};
use porchlight_core::services::dispatcher::{
    DispatchError, NewsletterDispatcher, QueueStore, QueueStoreError,
};
use porchlight_core::services::gatekeeper::is_valid_email;
use porchlight_infra::db::{
    cancel_queue_item, find_blog_post, find_queue_item, insert_queue_item, list_queue_items,
    NewsletterRepoError, PgNewsletterQueue, PostsRepoError,
};
use porchlight_infra::kit::KitClient;

const DEFAULT_LIST_LIMIT: i64 = 50;

/// Mode as posted by the admin UI. `send_at` may be left out of a schedule
/// request when the queue record carries the time.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DispatchModeRequest {
    Test { to: String },
    Draft,
    Schedule { send_at: Option<DateTime<Utc>> },
    SendNow,
}

impl DispatchModeRequest {
    fn tracks_queue(&self) -> bool {
        matches!(self, DispatchModeRequest::Schedule { .. } | DispatchModeRequest::SendNow)
    }
}

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    #[serde(flatten)]
    pub mode: DispatchModeRequest,
    pub post_id: Option<Uuid>,
    pub queue_id: Option<Uuid>,
    pub blog_post: Option<ContentItem>,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub success: bool,
    pub message: String,
    pub broadcast_id: BroadcastId,
    pub scheduled: bool,
}

#[derive(Debug, Deserialize)]
pub struct QueueListParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct QueueListResponse {
    pub items: Vec<NewsletterQueueItem>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub post_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct QueueItemResponse {
    pub success: bool,
    pub item: NewsletterQueueItem,
}

#[derive(Debug, Error)]
pub enum NewsletterApiError {
    #[error("invalid request body")]
    InvalidPayload,
    #[error("one of blog_post, post_id or queue_id is required")]
    MissingContent,
    #[error("send_at is required to schedule without a queue record")]
    MissingSendAt,
    #[error("invalid test recipient")]
    InvalidRecipient,
    #[error("invalid status filter: {0}")]
    InvalidStatus(String),
    #[error("db not configured")]
    DbUnavailable,
    #[error("newsletter provider not configured")]
    ProviderUnavailable,
    #[error("blog post {0} not found")]
    PostNotFound(Uuid),
    #[error("queue item {0} not found")]
    QueueNotFound(Uuid),
    #[error("queue item {id} is {status} and cannot be cancelled")]
    NotCancellable { id: Uuid, status: QueueStatus },
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("posts error: {0}")]
    Posts(#[from] PostsRepoError),
    #[error("queue error: {0}")]
    Queue(#[from] NewsletterRepoError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    success: bool,
}

pub async fn post_dispatch(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DispatchResponse>, NewsletterApiError> {
    let request: DispatchRequest = parse_json(&body)?;
    let kit = state
        .kit_client()
        .ok_or(NewsletterApiError::ProviderUnavailable)?;

    let queue_record = match queue_lookup(&request) {
        Some(id) => {
            let pool = state.db.as_ref().ok_or(NewsletterApiError::DbUnavailable)?;
            Some(
                find_queue_item(pool, id)
                    .await?
                    .ok_or(NewsletterApiError::QueueNotFound(id))?,
            )
        }
        None => None,
    };
    let mode = resolve_mode(request.mode, queue_record.as_ref())?;
    let item = match content_source(request.blog_post, request.post_id, queue_record.as_ref())? {
        ContentSource::Inline(item) => item,
        ContentSource::Post(post_id) => load_post(&state, post_id).await?,
    };

    let template = state.config.email_template();
    let receipt = match state.db.as_ref() {
        Some(pool) => {
            NewsletterDispatcher::new(kit, PgNewsletterQueue::new(pool.clone()), SystemClock, template)
                .dispatch(&item, mode.clone(), request.queue_id)
                .await?
        }
        None => {
            NewsletterDispatcher::new(kit, DetachedQueue, SystemClock, template)
                .dispatch(&item, mode.clone(), None)
                .await?
        }
    };

    Ok(Json(DispatchResponse {
        success: true,
        message: success_message(&mode),
        broadcast_id: receipt.broadcast_id,
        scheduled: receipt.scheduled,
    }))
}

pub async fn list_queue(
    State(state): State<AppState>,
    Query(params): Query<QueueListParams>,
) -> Result<Json<QueueListResponse>, NewsletterApiError> {
    let status = match params.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<QueueStatus>()
                .map_err(|_| NewsletterApiError::InvalidStatus(raw.to_string()))?,
        ),
    };
    let pool = state.db.as_ref().ok_or(NewsletterApiError::DbUnavailable)?;
    let items = list_queue_items(pool, status, params.limit.unwrap_or(DEFAULT_LIST_LIMIT)).await?;
    Ok(Json(QueueListResponse { items }))
}

pub async fn post_queue(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<QueueItemResponse>), NewsletterApiError> {
    let request: EnqueueRequest = parse_json(&body)?;
    let pool = state.db.as_ref().ok_or(NewsletterApiError::DbUnavailable)?;
    if find_blog_post(pool, request.post_id).await?.is_none() {
        return Err(NewsletterApiError::PostNotFound(request.post_id));
    }
    let item = insert_queue_item(pool, request.post_id, request.scheduled_for).await?;
    info!(
        queue_id = %item.id,
        post_id = %item.post_id,
        scheduled_for = %item.scheduled_for,
        "newsletter queued"
    );
    Ok((
        StatusCode::CREATED,
        Json(QueueItemResponse {
            success: true,
            item,
        }),
    ))
}

pub async fn cancel_queue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueItemResponse>, NewsletterApiError> {
    let pool = state.db.as_ref().ok_or(NewsletterApiError::DbUnavailable)?;
    let record = find_queue_item(pool, id)
        .await?
        .ok_or(NewsletterApiError::QueueNotFound(id))?;
    // the conditional update is authoritative; the read only names the status
    if !record.can_cancel() || !cancel_queue_item(pool, id).await? {
        return Err(NewsletterApiError::NotCancellable {
            id,
            status: record.status,
        });
    }
    info!(queue_id = %id, "newsletter cancelled");
    Ok(Json(QueueItemResponse {
        success: true,
        item: NewsletterQueueItem {
            status: QueueStatus::Cancelled,
            ..record
        },
    }))
}

async fn load_post(state: &AppState, post_id: Uuid) -> Result<ContentItem, NewsletterApiError> {
    let pool = state.db.as_ref().ok_or(NewsletterApiError::DbUnavailable)?;
    find_blog_post(pool, post_id)
        .await?
        .ok_or(NewsletterApiError::PostNotFound(post_id))
}

/// Where the dispatched article comes from: an inline post wins over `post_id`,
/// which wins over the queue record's post.
#[derive(Debug)]
enum ContentSource {
    Inline(ContentItem),
    Post(Uuid),
}

fn content_source(
    blog_post: Option<ContentItem>,
    post_id: Option<Uuid>,
    queue_record: Option<&NewsletterQueueItem>,
) -> Result<ContentSource, NewsletterApiError> {
    match (blog_post, post_id, queue_record) {
        (Some(item), _, _) => Ok(ContentSource::Inline(item)),
        (None, Some(post_id), _) => Ok(ContentSource::Post(post_id)),
        (None, None, Some(record)) => Ok(ContentSource::Post(record.post_id)),
        (None, None, None) => Err(NewsletterApiError::MissingContent),
    }
}

/// Queue record a dispatch has to load. Schedule and send_now always track it;
/// test and draft only read it when it is the sole pointer to the post.
fn queue_lookup(request: &DispatchRequest) -> Option<Uuid> {
    let id = request.queue_id?;
    let names_post = request.blog_post.is_some() || request.post_id.is_some();
    (request.mode.tracks_queue() || !names_post).then_some(id)
}

fn resolve_mode(
    request: DispatchModeRequest,
    queue_record: Option<&NewsletterQueueItem>,
) -> Result<DispatchMode, NewsletterApiError> {
    Ok(match request {
        DispatchModeRequest::Test { to } => {
            let to = to.trim();
            if !is_valid_email(to) {
                return Err(NewsletterApiError::InvalidRecipient);
            }
            DispatchMode::Test { to: to.to_string() }
        }
        DispatchModeRequest::Draft => DispatchMode::Draft,
        DispatchModeRequest::Schedule { send_at } => {
            let send_at = send_at
                .or_else(|| queue_record.map(|record| record.scheduled_for))
                .ok_or(NewsletterApiError::MissingSendAt)?;
            DispatchMode::Schedule { send_at }
        }
        DispatchModeRequest::SendNow => DispatchMode::SendNow,
    })
}

fn success_message(mode: &DispatchMode) -> String {
    match mode {
        DispatchMode::Test { to } => format!("Test email sent to {to}"),
        DispatchMode::Draft => "Draft broadcast created".to_string(),
        DispatchMode::Schedule { send_at } => {
            format!("Newsletter scheduled for {}", send_at.to_rfc3339())
        }
        DispatchMode::SendNow => "Newsletter sent".to_string(),
    }
}

fn parse_json<T>(body: &Bytes) -> Result<T, NewsletterApiError>
where
    T: DeserializeOwned,
{
    if body.is_empty() {
        return Err(NewsletterApiError::InvalidPayload);
    }
    serde_json::from_slice(body).map_err(|_| NewsletterApiError::InvalidPayload)
}

/// Queue stand-in when no database is configured. Only reached for dispatches
/// that carry no queue id, which never touch the queue.
struct DetachedQueue;

#[async_trait]
impl QueueStore for DetachedQueue {
    async fn find_queue_item(&self, _id: Uuid) -> Result<Option<NewsletterQueueItem>, QueueStoreError> {
        Ok(None)
    }

    async fn claim_for_dispatch(&self, _id: Uuid) -> Result<bool, QueueStoreError> {
        Ok(false)
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        _transition: &QueueTransition,
    ) -> Result<(), QueueStoreError> {
        Err(QueueStoreError::Storage(format!(
            "no queue store configured for {id}"
        )))
    }
}

impl NewsletterApiError {
    fn status(&self) -> StatusCode {
        match self {
            NewsletterApiError::InvalidPayload
            | NewsletterApiError::MissingContent
            | NewsletterApiError::MissingSendAt
            | NewsletterApiError::InvalidRecipient
            | NewsletterApiError::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            NewsletterApiError::DbUnavailable | NewsletterApiError::ProviderUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            NewsletterApiError::PostNotFound(_) | NewsletterApiError::QueueNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            NewsletterApiError::NotCancellable { .. } => StatusCode::CONFLICT,
            NewsletterApiError::Dispatch(err) => match err {
                DispatchError::Create(_) | DispatchError::Publish { .. } => StatusCode::BAD_GATEWAY,
                DispatchError::QueueNotFound(_) => StatusCode::NOT_FOUND,
                DispatchError::QueueClosed { .. } => StatusCode::CONFLICT,
                DispatchError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            NewsletterApiError::Posts(_) | NewsletterApiError::Queue(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for NewsletterApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "newsletter request failed");
        } else if status == StatusCode::CONFLICT {
            warn!(error = %self, "newsletter request conflicts with queue state");
        }
        let body = Json(ErrorBody {
            error: self.to_string(),
            success: false,
        });
        (status, body).into_response()
    }
}
