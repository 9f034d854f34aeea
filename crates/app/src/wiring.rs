use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;
use tracing::warn;

use crate::config::AppConfig;
use crate::state::AppState;
use porchlight_infra::db::{connect_lazy, DbPoolError};

#[derive(Debug, Error)]
pub enum WiringError {
    #[error("db pool error: {0}")]
    Db(#[from] DbPoolError),
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

pub fn build_state(config: AppConfig) -> Result<AppState, WiringError> {
    let client = Client::builder().timeout(config.request_timeout).build()?;
    let db = match config.database_url.as_deref() {
        Some(url) => Some(connect_lazy(url, config.db_acquire_timeout)?),
        None => {
            warn!("database url not configured; comments and newsletter queue disabled");
            None
        }
    };
    if config.kit_api_key.is_none() {
        warn!("kit api key not configured; newsletter dispatch disabled");
    }
    Ok(AppState {
        config: Arc::new(config),
        http_client: client,
        db,
    })
}
