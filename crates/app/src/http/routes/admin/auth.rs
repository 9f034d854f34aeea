use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::http::middleware::admin_auth;
use crate::state::AppState;

const DEFAULT_SESSION_DAYS: i64 = 7;
const MAX_SESSION_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub password: String,
    pub session_days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AdminLoginResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: String,
    pub max_age_secs: i64,
}

#[derive(Debug, Error)]
pub enum AdminLoginError {
    #[error("admin auth not configured")]
    MissingConfig,
    #[error("password is required")]
    MissingPassword,
    #[error("session_days must be between 1 and 30")]
    InvalidSessionDays,
    #[error("invalid password")]
    InvalidPassword,
    #[error("invalid admin password hash")]
    InvalidHash,
    #[error("token issuance failed")]
    TokenIssue,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    success: bool,
}

/// Exchanges the admin password for a signed token, returned in the body and as a cookie.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AdminLoginRequest>,
) -> Result<Response, AdminLoginError> {
    let password = payload.password.trim();
    if password.is_empty() {
        return Err(AdminLoginError::MissingPassword);
    }
    let session_days = resolve_session_days(payload.session_days)?;

    let config = &state.config;
    let (Some(hash), Some(secret)) = (
        config.admin_password_hash.as_deref(),
        config.admin_token_secret.as_deref(),
    ) else {
        return Err(AdminLoginError::MissingConfig);
    };

    if let Err(err) = verify_password(hash, password) {
        warn!(error = %err, "admin login refused");
        return Err(err);
    }

    let max_age_secs = session_days.saturating_mul(24 * 60 * 60);
    let token = admin_auth::issue_token(secret, max_age_secs)
        .map_err(|_| AdminLoginError::TokenIssue)?;
    let cookie = admin_auth::build_cookie_value(&token, max_age_secs, admin_auth::is_https(&headers));
    let expires_at = (Utc::now() + Duration::seconds(max_age_secs)).to_rfc3339();
    info!(session_days, "admin login");

    let response = Json(AdminLoginResponse {
        success: true,
        token,
        expires_at,
        max_age_secs,
    })
    .into_response();
    Ok(admin_auth::attach_cookie(response, cookie))
}

fn verify_password(hash: &str, password: &str) -> Result<(), AdminLoginError> {
    let parsed = PasswordHash::new(hash).map_err(|_| AdminLoginError::InvalidHash)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AdminLoginError::InvalidPassword)
}

fn resolve_session_days(value: Option<i64>) -> Result<i64, AdminLoginError> {
    match value.unwrap_or(DEFAULT_SESSION_DAYS) {
        days @ 1..=MAX_SESSION_DAYS => Ok(days),
        _ => Err(AdminLoginError::InvalidSessionDays),
    }
}

impl IntoResponse for AdminLoginError {
    fn into_response(self) -> Response {
        let status = match self {
            AdminLoginError::MissingConfig | AdminLoginError::InvalidHash => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AdminLoginError::MissingPassword | AdminLoginError::InvalidSessionDays => {
                StatusCode::BAD_REQUEST
            }
            AdminLoginError::InvalidPassword => StatusCode::UNAUTHORIZED,
            AdminLoginError::TokenIssue => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
            success: false,
        });
        (status, body).into_response()
    }
}
