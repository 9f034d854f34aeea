use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::http::middleware::client_meta;
use crate::state::AppState;
use porchlight_core::clock::SystemClock;
use porchlight_core::domain::comments::{
    CommentSubmission, CommentThread, PublicComment, RejectReason, StoredComment, SubmitOutcome,
};
use porchlight_core::services::gatekeeper::{CommentGatekeeper, CommentStoreError};
use porchlight_infra::db::{list_approved_comments, PgCommentStore};

const MAX_POST_ID_LEN: usize = 512;

#[derive(Debug, Deserialize)]
pub struct CommentsParams {
    pub post_id: Option<String>,
}

/// Form payload. Every field is optional here so missing values reach the
/// gatekeeper and come back as `invalid-input`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRequest {
    pub post_id: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub content: Option<String>,
    pub parent_comment_id: Option<String>,
    pub honeypot: Option<String>,
    pub time_to_submit: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub success: bool,
    pub comment: StoredComment,
    pub message: &'static str,
}

#[derive(Debug, Error)]
pub enum CommentsApiError {
    #[error("post_id is required")]
    MissingPostId,
    #[error("post_id is invalid")]
    InvalidPostId,
    #[error("invalid request body")]
    InvalidPayload,
    #[error("{}", .0.message())]
    Rejected(RejectReason),
    #[error("db not configured")]
    DbUnavailable,
    #[error("failed to save comment")]
    Store(#[from] CommentStoreError),
    #[error("failed to load comments")]
    Db(#[from] porchlight_infra::db::CommentsRepoError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn post_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CommentResponse>, CommentsApiError> {
    let payload: CommentRequest = parse_json(&body)?;
    let pool = state.db.as_ref().ok_or(CommentsApiError::DbUnavailable)?;
    let submission = build_submission(payload, &headers)?;

    let gatekeeper = CommentGatekeeper::new(
        PgCommentStore::new(pool.clone()),
        SystemClock,
        state.config.comment_limits,
    );
    let outcome = gatekeeper.submit(submission).await?;
    outcome_response(outcome).map(Json)
}

pub async fn get_comments(
    State(state): State<AppState>,
    Query(params): Query<CommentsParams>,
) -> Result<Json<CommentThread>, CommentsApiError> {
    let post_id = normalize_post_id(params.post_id)?;
    let pool = state.db.as_ref().ok_or(CommentsApiError::DbUnavailable)?;
    let records = list_approved_comments(pool, &post_id).await?;
    let comments = build_comment_tree(&records);
    Ok(Json(CommentThread {
        post_id,
        total: records.len(),
        comments,
    }))
}

fn build_submission(
    payload: CommentRequest,
    headers: &HeaderMap,
) -> Result<CommentSubmission, CommentsApiError> {
    let parent_comment_id = match payload.parent_comment_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            Uuid::parse_str(raw)
                .map_err(|_| CommentsApiError::Rejected(RejectReason::InvalidParent))?,
        ),
    };
    Ok(CommentSubmission {
        post_id: payload.post_id.unwrap_or_default(),
        author_name: payload.author_name.unwrap_or_default(),
        author_email: payload.author_email.unwrap_or_default(),
        content: payload.content.unwrap_or_default(),
        parent_comment_id,
        honeypot: payload.honeypot,
        time_to_submit_secs: payload.time_to_submit.filter(|secs| secs.is_finite()),
        ip_address: client_meta::client_ip(headers),
        user_agent: client_meta::user_agent(headers),
    })
}

fn outcome_response(outcome: SubmitOutcome) -> Result<CommentResponse, CommentsApiError> {
    let (comment, message) = match outcome {
        SubmitOutcome::Accepted(comment) => (comment, "Comment posted successfully"),
        SubmitOutcome::Held(comment) | SubmitOutcome::Flagged(comment) => {
            (comment, RejectReason::SpamScore.message())
        }
        SubmitOutcome::Rejected(reason) => return Err(CommentsApiError::Rejected(reason)),
    };
    Ok(CommentResponse {
        success: true,
        comment,
        message,
    })
}

fn parse_json<T>(body: &Bytes) -> Result<T, CommentsApiError>
where
    T: DeserializeOwned,
{
    if body.is_empty() {
        return Err(CommentsApiError::InvalidPayload);
    }
    serde_json::from_slice(body).map_err(|_| CommentsApiError::InvalidPayload)
}

fn normalize_post_id(value: Option<String>) -> Result<String, CommentsApiError> {
    let raw = value.unwrap_or_default();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CommentsApiError::MissingPostId);
    }
    if trimmed.len() > MAX_POST_ID_LEN || trimmed.chars().any(char::is_whitespace) {
        return Err(CommentsApiError::InvalidPostId);
    }
    Ok(trimmed.to_string())
}

/// Nests replies under their parents. Replies whose parent is not in the
/// approved set are promoted to the top level.
fn build_comment_tree(records: &[StoredComment]) -> Vec<PublicComment> {
    let index: HashMap<Uuid, usize> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| (record.id, idx))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    let mut roots = Vec::new();
    for (idx, record) in records.iter().enumerate() {
        match record.parent_comment_id.and_then(|id| index.get(&id)) {
            Some(&parent_idx) if parent_idx != idx => children[parent_idx].push(idx),
            _ => roots.push(idx),
        }
    }

    roots
        .into_iter()
        .map(|idx| build_comment_node(idx, records, &children))
        .collect()
}

fn build_comment_node(
    idx: usize,
    records: &[StoredComment],
    children: &[Vec<usize>],
) -> PublicComment {
    let record = &records[idx];
    PublicComment {
        id: record.id,
        author_name: record.author_name.clone(),
        content: record.content.clone(),
        created_at: record.created_at,
        replies: children[idx]
            .iter()
            .map(|child| build_comment_node(*child, records, children))
            .collect(),
    }
}

impl IntoResponse for CommentsApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            CommentsApiError::MissingPostId
            | CommentsApiError::InvalidPostId
            | CommentsApiError::InvalidPayload => StatusCode::BAD_REQUEST,
            CommentsApiError::Rejected(RejectReason::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            CommentsApiError::Rejected(_) => StatusCode::BAD_REQUEST,
            CommentsApiError::DbUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            CommentsApiError::Store(err) => {
                error!(error = %err, "comment submission failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            CommentsApiError::Db(err) => {
                error!(error = %err, "comment listing failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use porchlight_core::domain::comments::CommentStatus;

    fn record(id: Uuid, parent: Option<Uuid>, minute: i64) -> StoredComment {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minute);
        StoredComment {
            id,
            post_id: "deep-work".to_string(),
            author_name: "Ada".to_string(),
            author_email: "ada@example.com".to_string(),
            content: format!("comment {minute}"),
            parent_comment_id: parent,
            status: CommentStatus::Approved,
            spam_score: 0.0,
            ip_address: "203.0.113.9".to_string(),
            user_agent: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn build_comment_tree_nests_replies() {
        let root = Uuid::new_v4();
        let reply = Uuid::new_v4();
        let nested = Uuid::new_v4();
        let records = vec![
            record(root, None, 0),
            record(reply, Some(root), 1),
            record(nested, Some(reply), 2),
        ];
        let tree = build_comment_tree(&records);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].replies.len(), 1);
        assert_eq!(tree[0].replies[0].id, reply);
        assert_eq!(tree[0].replies[0].replies[0].id, nested);
    }

    #[test]
    fn build_comment_tree_promotes_orphans() {
        let hidden_parent = Uuid::new_v4();
        let orphan = Uuid::new_v4();
        let records = vec![record(Uuid::new_v4(), None, 0), record(orphan, Some(hidden_parent), 1)];
        let tree = build_comment_tree(&records);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[1].id, orphan);
    }

    #[test]
    fn normalize_post_id_rejects_blank_and_whitespace() {
        assert!(matches!(normalize_post_id(None), Err(CommentsApiError::MissingPostId)));
        assert!(matches!(
            normalize_post_id(Some("deep work".to_string())),
            Err(CommentsApiError::InvalidPostId)
        ));
        assert_eq!(normalize_post_id(Some(" deep-work ".to_string())).unwrap(), "deep-work");
    }

    #[test]
    fn request_body_uses_camel_case() {
        let body = Bytes::from_static(
            br#"{"postId":"p1","authorName":"Ada","authorEmail":"ada@example.com","content":"hi","timeToSubmit":12.5,"honeypot":""}"#,
        );
        let payload: CommentRequest = parse_json(&body).unwrap();
        assert_eq!(payload.post_id.as_deref(), Some("p1"));
        assert_eq!(payload.time_to_submit, Some(12.5));
        assert!(matches!(
            parse_json::<CommentRequest>(&Bytes::new()),
            Err(CommentsApiError::InvalidPayload)
        ));
    }

    #[test]
    fn build_submission_reads_client_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.7, 10.0.0.1".parse().unwrap());
        headers.insert("user-agent", "Mozilla/5.0".parse().unwrap());
        let submission = build_submission(CommentRequest::default(), &headers).unwrap();
        assert_eq!(submission.ip_address, "198.51.100.7");
        assert_eq!(submission.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert!(submission.parent_comment_id.is_none());
    }

    #[test]
    fn malformed_parent_id_is_an_invalid_parent() {
        let payload = CommentRequest {
            parent_comment_id: Some("not-a-uuid".to_string()),
            ..CommentRequest::default()
        };
        let err = build_submission(payload, &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, CommentsApiError::Rejected(RejectReason::InvalidParent)));
    }

    #[test]
    fn rejections_map_to_status_codes() {
        let status = |err: CommentsApiError| err.into_response().status();
        assert_eq!(
            status(CommentsApiError::Rejected(RejectReason::RateLimited)),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status(CommentsApiError::Rejected(RejectReason::SpamHoneypot)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(CommentsApiError::DbUnavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(CommentsApiError::Store(CommentStoreError::Storage("down".to_string()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn stored_outcomes_are_successful_responses() {
        let held = outcome_response(SubmitOutcome::Held(record(Uuid::new_v4(), None, 0))).unwrap();
        assert!(held.success);
        assert_eq!(held.message, "Comment submitted for moderation");
        let accepted = outcome_response(SubmitOutcome::Accepted(record(Uuid::new_v4(), None, 0))).unwrap();
        assert_eq!(accepted.message, "Comment posted successfully");
        assert!(matches!(
            outcome_response(SubmitOutcome::Rejected(RejectReason::Duplicate)),
            Err(CommentsApiError::Rejected(RejectReason::Duplicate))
        ));
    }
}
