use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{from_str, Value};
use tracing::debug;

use porchlight_core::domain::newsletter::BroadcastId;
use porchlight_core::services::dispatcher::{BroadcastProvider, BroadcastRequest, ProviderError};

pub const DEFAULT_API_BASE: &str = "https://api.kit.com/v4";
const USER_AGENT: &str = "porchlight";
const API_KEY_HEADER: &str = "X-Kit-Api-Key";

#[derive(Debug, Clone)]
pub struct KitCredentials {
    pub api_key: String,
    pub api_base: String,
    pub email_template_id: Option<i64>,
}

/// Email broadcast client for Kit (formerly ConvertKit).
#[derive(Debug, Clone)]
pub struct KitClient {
    http: reqwest::Client,
    credentials: KitCredentials,
}

impl KitClient {
    pub fn new(http: reqwest::Client, credentials: KitCredentials) -> Self {
        Self { http, credentials }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.credentials.api_base.trim_end_matches('/'), path)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(self.url(path))
            .header(API_KEY_HEADER, &self.credentials.api_key)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl BroadcastProvider for KitClient {
    async fn create_broadcast(&self, request: &BroadcastRequest) -> Result<BroadcastId, ProviderError> {
        let payload = CreateBroadcastBody::from_request(request, self.credentials.email_template_id);
        let body = self.post("broadcasts", &payload).await?;
        let id = parse_broadcast_id(&body)?;
        debug!(broadcast_id = %id, "kit broadcast created");
        Ok(id)
    }

    async fn publish_broadcast(&self, broadcast_id: &BroadcastId) -> Result<(), ProviderError> {
        let path = format!("broadcasts/{}/publish", broadcast_id.as_str());
        self.post(&path, &serde_json::json!({})).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct CreateBroadcastBody<'a> {
    subject: &'a str,
    content: &'a str,
    description: &'a str,
    preview_text: &'a str,
    public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    send_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email_template_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscriber_filter: Option<Vec<SubscriberFilter<'a>>>,
}

#[derive(Debug, Serialize)]
struct SubscriberFilter<'a> {
    all: Vec<FilterCondition<'a>>,
}

#[derive(Debug, Serialize)]
struct FilterCondition<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    email: &'a str,
}

impl<'a> CreateBroadcastBody<'a> {
    fn from_request(request: &'a BroadcastRequest, email_template_id: Option<i64>) -> Self {
        Self {
            subject: &request.subject,
            content: &request.content_html,
            description: &request.description,
            preview_text: &request.preview_text,
            public: request.public,
            send_at: request.send_at.map(format_timestamp),
            email_template_id,
            subscriber_filter: request.recipient.as_deref().map(|email| {
                vec![SubscriberFilter {
                    all: vec![FilterCondition {
                        kind: "email",
                        email,
                    }],
                }]
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateBroadcastResponse {
    broadcast: BroadcastNode,
}

#[derive(Debug, Deserialize)]
struct BroadcastNode {
    id: Value,
}

fn parse_broadcast_id(body: &str) -> Result<BroadcastId, ProviderError> {
    let payload: CreateBroadcastResponse = from_str(body)
        .map_err(|_| ProviderError::InvalidResponse(format!("unexpected broadcast payload: {body}")))?;
    match payload.broadcast.id {
        Value::Number(number) => Ok(BroadcastId(number.to_string())),
        Value::String(value) if !value.trim().is_empty() => Ok(BroadcastId(value)),
        other => Err(ProviderError::InvalidResponse(format!("invalid broadcast id: {other}"))),
    }
}

/// Joins `{"errors": [...]}` into one line, or falls back to the raw body.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        errors: Vec<String>,
    }
    match from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join(", "),
        _ => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty response".to_string()
            } else {
                trimmed.to_string()
            }
        }
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Transport(err.to_string())
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}
