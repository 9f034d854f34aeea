use axum::body::Body;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use crate::state::AppState;

const ADMIN_COOKIE_NAME: &str = "porchlight_admin";
const ADMIN_PREFIX: &str = "/v2/admin";
const LOGIN_PATH: &str = "/v2/admin/login";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum AdminAuthError {
    #[error("admin auth not configured")]
    MissingConfig,
    #[error("admin token required")]
    MissingToken,
    #[error("admin token invalid")]
    InvalidToken,
}

#[derive(Debug, Serialize, Deserialize)]
struct AdminTokenPayload {
    exp: i64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    success: bool,
}

/// Guards every `/v2/admin` route except login.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AdminAuthError> {
    if !requires_token(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let secret = state
        .config
        .admin_token_secret
        .as_deref()
        .ok_or(AdminAuthError::MissingConfig)?;

    let token = extract_bearer_token(request.headers())
        .or_else(|| extract_cookie(request.headers(), ADMIN_COOKIE_NAME))
        .ok_or(AdminAuthError::MissingToken)?;
    if !verify_token(secret, &token, Utc::now().timestamp()) {
        debug!(path = %request.uri().path(), "admin token rejected");
        return Err(AdminAuthError::InvalidToken);
    }
    Ok(next.run(request).await)
}

fn requires_token(path: &str) -> bool {
    path.starts_with(ADMIN_PREFIX) && path != LOGIN_PATH
}

pub fn issue_token(secret: &str, max_age_secs: i64) -> Result<String, AdminAuthError> {
    let exp = Utc::now().timestamp().saturating_add(max_age_secs);
    let json = serde_json::to_vec(&AdminTokenPayload { exp })
        .map_err(|_| AdminAuthError::InvalidToken)?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(json);
    let mac = keyed_mac(secret, &payload_b64).ok_or(AdminAuthError::MissingConfig)?;
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{payload_b64}.{signature}"))
}

pub fn build_cookie_value(token: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{ADMIN_COOKIE_NAME}={token}; Path={ADMIN_PREFIX}; HttpOnly; SameSite=Strict; Max-Age={max_age_secs}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn attach_cookie(mut response: Response, cookie_value: String) -> Response {
    if let Ok(value) = cookie_value.parse() {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}

pub fn is_https(headers: &HeaderMap) -> bool {
    let forwarded_proto = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case("https"))
        });
    if forwarded_proto {
        return true;
    }
    headers
        .get("forwarded")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(';')
                .filter_map(|part| part.trim().strip_prefix("proto="))
                .any(|proto| proto.trim().eq_ignore_ascii_case("https"))
        })
}

fn verify_token(secret: &str, token: &str, now: i64) -> bool {
    let Some((payload_b64, signature_b64)) = token.split_once('.') else {
        return false;
    };
    if payload_b64.is_empty() || signature_b64.is_empty() {
        return false;
    }
    let Ok(signature) = URL_SAFE_NO_PAD.decode(signature_b64.as_bytes()) else {
        return false;
    };
    let Some(mac) = keyed_mac(secret, payload_b64) else {
        return false;
    };
    if mac.verify_slice(&signature).is_err() {
        return false;
    }
    decode_payload(payload_b64).is_some_and(|payload| payload.exp > now)
}

fn keyed_mac(secret: &str, payload_b64: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload_b64.as_bytes());
    Some(mac)
}

fn decode_payload(payload_b64: &str) -> Option<AdminTokenPayload> {
    let bytes = URL_SAFE_NO_PAD.decode(payload_b64.as_bytes()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let value = header.trim().strip_prefix("Bearer ")?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        (key.trim() == name).then(|| value.trim().to_string())
    })
}

impl IntoResponse for AdminAuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AdminAuthError::MissingConfig => StatusCode::SERVICE_UNAVAILABLE,
            AdminAuthError::MissingToken | AdminAuthError::InvalidToken => StatusCode::UNAUTHORIZED,
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
            success: false,
        });
        (status, body).into_response()
    }
}
