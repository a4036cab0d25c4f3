//! HTTP surface of the relay: `/ws` for job control and events, `/api` for
//! profile-scoped helpdesk lookups.

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::info;

use crate::jobs::JobContext;

pub mod errors;
pub mod routes;
pub mod socket;

#[derive(Clone, Debug)]
pub struct AppState {
    pub jobs: JobContext,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ws", get(socket::ws_handler))
        .nest("/api", routes::router())
        .with_state(state)
}

pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
