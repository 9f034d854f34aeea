pub mod middleware;
pub mod router;
pub mod routes;

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::state::AppState;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn serve(addr: SocketAddr, state: AppState) -> Result<(), HttpError> {
    let router = router::build(state);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| HttpError::Bind { addr, source })?;
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::serve(listener, router).await?;
    Ok(())
}
