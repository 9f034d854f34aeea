mod cli;
mod config;
mod http;
mod state;
mod wiring;

use clap::Parser;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::{AppConfig, ConfigError};
use crate::http::HttpError;
use crate::wiring::WiringError;
use porchlight_infra::db::run_migrations;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("wiring error: {0}")]
    Wiring(#[from] WiringError),
    #[error("db error: {0}")]
    Db(#[from] porchlight_infra::db::DbPoolError),
    #[error("http error: {0}")]
    Http(#[from] HttpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    // the runtime is built afterwards, so no other thread can observe the env writes
    config::load_dotenv()?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = config::AppConfig::from_env()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: AppConfig) -> Result<(), AppError> {
    let state = wiring::build_state(config)?;
    match state.db.as_ref() {
        Some(pool) if !cli.skip_migrations => run_migrations(pool).await?,
        Some(_) => info!("migrations skipped"),
        None => {}
    }

    let addr = state.config.http_addr;
    let api = tokio::spawn(async move {
        info!(%addr, "http server starting");
        http::serve(addr, state).await
    });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
        res = api => {
            res??;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install ctrl-c handler");
    }
}
