use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::http::middleware::admin_auth;
use crate::http::routes::{admin, comments, health};
use crate::state::AppState;

pub fn build(state: AppState) -> Router {
    let cors = CorsPolicy::from_config(&state.config.cors_allow_origins).into_layer();
    let mut router = Router::new()
        .route("/health", get(health::health))
        .route(
            "/v2/comments",
            get(comments::get_comments).post(comments::post_comment),
        )
        .route("/v2/admin/login", post(admin::auth::login))
        .route(
            "/v2/admin/newsletter/dispatch",
            post(admin::newsletter::post_dispatch),
        )
        .route(
            "/v2/admin/newsletter/queue",
            get(admin::newsletter::list_queue).post(admin::newsletter::post_queue),
        )
        .route(
            "/v2/admin/newsletter/queue/{id}/cancel",
            post(admin::newsletter::cancel_queue),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth::require_admin,
        ))
        .with_state(state);
    if let Some(cors) = cors {
        router = router.layer(cors);
    }
    router
}

/// Which browsers may call the API.
#[derive(Debug, PartialEq)]
enum CorsPolicy {
    Disabled,
    AnyOrigin,
    Origins(Vec<HeaderValue>),
}

impl CorsPolicy {
    fn from_config(allow_origins: &[String]) -> Self {
        if allow_origins.iter().any(|origin| origin.trim() == "*") {
            return CorsPolicy::AnyOrigin;
        }
        let origins: Vec<HeaderValue> = allow_origins
            .iter()
            .filter_map(|origin| {
                HeaderValue::from_str(origin.trim())
                    .inspect_err(|_| tracing::warn!(origin = %origin, "invalid CORS origin ignored"))
                    .ok()
            })
            .collect();
        if origins.is_empty() {
            CorsPolicy::Disabled
        } else {
            CorsPolicy::Origins(origins)
        }
    }

    fn into_layer(self) -> Option<CorsLayer> {
        let base = CorsLayer::new().allow_methods([Method::GET, Method::POST, Method::OPTIONS]);
        match self {
            CorsPolicy::Disabled => None,
            CorsPolicy::AnyOrigin => Some(base.allow_origin(Any).allow_headers(Any)),
            CorsPolicy::Origins(origins) => Some(
                base.allow_origin(AllowOrigin::list(origins))
                    .allow_credentials(true)
                    .allow_headers([CONTENT_TYPE, AUTHORIZATION]),
            ),
        }
    }
}
