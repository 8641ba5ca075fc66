//! HTTP API server for the inbox daemon

pub mod chats;
pub mod health;
pub mod webhooks;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::db::{ChatRepo, DbPool, MediaRepo, MessageRepo};
use crate::ingest::Pipeline;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub pipeline: Arc<Pipeline>,
    pub chats: ChatRepo,
    pub messages: MessageRepo,
    pub media: MediaRepo,
}

impl ApiState {
    /// Assemble state over one connection pool
    #[must_use]
    pub fn new(db: DbPool, pipeline: Arc<Pipeline>) -> Self {
        Self {
            chats: ChatRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            media: MediaRepo::new(db.clone()),
            db,
            pipeline,
        }
    }
}

/// Build the full application router
#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/webhooks", webhooks::router(state.clone()))
        .merge(chats::router(state.clone()))
        .merge(health::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Run the API server
///
/// # Errors
///
/// Returns error if the server fails to bind or run
pub async fn serve(state: Arc<ApiState>, port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

    tracing::info!(port, "API server listening");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

    Ok(())
}
