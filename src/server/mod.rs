//! HTTP boundary: submit, poll, download.

pub mod error;
pub mod handlers;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::dispatcher::JobDispatcher;
use crate::job::JobRegistry;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<JobDispatcher>,
    pub registry: Arc<JobRegistry>,
}

impl AppState {
    pub fn new(dispatcher: Arc<JobDispatcher>) -> Self {
        let registry = Arc::clone(dispatcher.registry());
        Self { dispatcher, registry }
    }
}

/// Create the API router.
pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/edit_video", post(handlers::edit_video))
        .route("/api/status/:job_id", get(handlers::job_status))
        .route("/api/download/:job_id", get(handlers::download))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve `router` until the process is stopped.
pub async fn serve(router: Router, bind_address: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_address).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await
}
