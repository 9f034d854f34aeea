use std::sync::Arc;

use reqwest::Client;

use crate::config::AppConfig;
use porchlight_infra::db::DbPool;
use porchlight_infra::kit::{KitClient, KitCredentials};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub http_client: Client,
    pub db: Option<DbPool>,
}

impl AppState {
    /// Broadcast client, when an API key is configured.
    pub fn kit_client(&self) -> Option<KitClient> {
        let api_key = self.config.kit_api_key.clone()?;
        Some(KitClient::new(
            self.http_client.clone(),
            KitCredentials {
                api_key,
                api_base: self.config.kit_api_base.clone(),
                email_template_id: self.config.kit_email_template_id,
            },
        ))
    }
}
