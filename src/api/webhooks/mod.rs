//! Webhook endpoints for gateway callbacks

use std::sync::Arc;

use axum::{Router, routing::post};

use super::ApiState;

pub mod wapi;

/// Build the webhooks router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/wapi/{instance_id}", post(wapi::handle_event))
        .with_state(state)
}
