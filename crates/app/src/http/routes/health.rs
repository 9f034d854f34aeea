use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::config::AppConfig;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub modules: HealthModules,
}

#[derive(Debug, Serialize)]
pub struct HealthModules {
    pub database: DatabaseStatus,
    pub comments: ModuleStatus,
    pub newsletter: NewsletterStatus,
    pub admin: AdminStatus,
}

#[derive(Debug, Serialize)]
pub struct ModuleStatus {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct DatabaseStatus {
    pub configured: bool,
}

#[derive(Debug, Serialize)]
pub struct NewsletterStatus {
    pub enabled: bool,
    pub provider_configured: bool,
    pub queue_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct AdminStatus {
    pub configured: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        modules: modules(&state.config, state.db.is_some()),
    })
}

fn modules(config: &AppConfig, db_configured: bool) -> HealthModules {
    let provider_configured = config.kit_api_key.is_some();
    HealthModules {
        database: DatabaseStatus {
            configured: db_configured,
        },
        comments: ModuleStatus {
            enabled: db_configured,
        },
        newsletter: NewsletterStatus {
            enabled: provider_configured,
            provider_configured,
            queue_enabled: provider_configured && db_configured,
        },
        admin: AdminStatus {
            configured: config.admin_password_hash.is_some() && config.admin_token_secret.is_some(),
        },
    }
}
