//! Inbound W-API webhook handler
//!
//! The gateway retries anything that is not a 2xx, so this handler never
//! answers with an error status: malformed payloads, unknown instances,
//! and internal failures are all acked and logged. The body tells the
//! gateway (and the test suite) what actually happened.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use serde_json::Value;

use crate::api::ApiState;
use crate::ingest::IngestOutcome;

/// Webhook acknowledgement body
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

/// `POST /webhooks/wapi/{instance_id}`
pub async fn handle_event(
    State(state): State<Arc<ApiState>>,
    Path(instance_id): Path<String>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<WebhookResponse>) {
    let status = match state.pipeline.ingest(&instance_id, &payload) {
        Ok((IngestOutcome::Accepted, pending)) => {
            if !pending.is_empty() {
                // Download off the webhook path; the ack must not wait on
                // the CDN
                let pipeline = state.pipeline.clone();
                tokio::spawn(async move {
                    pipeline.resolve_media(pending).await;
                });
            }
            "ok"
        }
        Ok((IngestOutcome::Duplicate, _)) => "duplicate",
        Ok((IngestOutcome::Ignored, _)) => "ignored",
        Err(e) => {
            tracing::error!(instance_id, error = %e, "webhook ingestion failed");
            "ignored"
        }
    };

    (StatusCode::OK, Json(WebhookResponse { status }))
}
