//! Webhook ingestion pipeline
//!
//! One payload flows classify -> identity -> materialize -> media. The
//! message write is the transaction that matters: once a message row
//! exists the webhook has succeeded, and anything that goes wrong in the
//! media stage is recorded on the media reference, never bubbled back up
//! to undo the message.

pub mod classify;
pub mod identity;
pub mod materialize;

use std::sync::Arc;

use serde_json::Value;

pub use classify::{ContentBlock, Envelope, Party, classify};
pub use identity::{ChatId, ChatKind, resolve_chat_id};
pub use materialize::{Materialized, Materializer, Outcome};

use crate::Result;
use crate::db::{InstanceRepo, MediaReference, MediaRepo};
use crate::media::{DownloadStatus, MediaResolver, MediaScope, extract};

/// What the webhook handler should tell the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Message persisted
    Accepted,
    /// Already seen; nothing mutated
    Duplicate,
    /// Not a message, a protocol event, or an unknown instance
    Ignored,
}

/// The full ingestion pipeline for one gateway deployment
pub struct Pipeline {
    instances: InstanceRepo,
    materializer: Materializer,
    media: MediaRepo,
    resolver: Arc<MediaResolver>,
}

impl Pipeline {
    /// Create a pipeline
    #[must_use]
    pub fn new(
        instances: InstanceRepo,
        materializer: Materializer,
        media: MediaRepo,
        resolver: Arc<MediaResolver>,
    ) -> Self {
        Self {
            instances,
            materializer,
            media,
            resolver,
        }
    }

    /// Ingest one raw webhook payload for an instance
    ///
    /// Returns the outcome plus the media references that still need
    /// downloading; the caller decides whether to resolve them inline or
    /// on a background task (the webhook handler spawns, tests await).
    ///
    /// # Errors
    ///
    /// Returns error only for database failures in the message path;
    /// media bookkeeping failures are logged and swallowed
    pub fn ingest(
        &self,
        instance_id: &str,
        raw: &Value,
    ) -> Result<(IngestOutcome, Vec<MediaReference>)> {
        let Some(instance) = self.instances.get(instance_id)? else {
            tracing::warn!(instance_id, "webhook for unknown instance");
            return Ok((IngestOutcome::Ignored, Vec::new()));
        };

        let Some(envelope) = classify(raw, instance_id) else {
            tracing::debug!(instance_id, "payload is not a message event");
            return Ok((IngestOutcome::Ignored, Vec::new()));
        };

        let chat_id = resolve_chat_id(&envelope.chat.id, &envelope.sender.id);

        let materialized = match self
            .materializer
            .materialize(&instance.client_id, &envelope, &chat_id)?
        {
            Outcome::Created(materialized) => materialized,
            Outcome::Duplicate => return Ok((IngestOutcome::Duplicate, Vec::new())),
            Outcome::ProtocolSkipped => return Ok((IngestOutcome::Ignored, Vec::new())),
        };

        let scope = MediaScope {
            client_id: instance.client_id.clone(),
            instance_id: instance_id.to_string(),
            chat_id: chat_id.id.clone(),
        };

        // From here on the message stands; media trouble stays in the
        // media tables
        let mut pending = Vec::new();
        for candidate in extract(&envelope.content) {
            match self
                .media
                .record_candidate(&scope, &materialized.message.message_id, &candidate)
            {
                Ok(reference) if reference.download_status == DownloadStatus::Pending => {
                    pending.push(reference);
                }
                Ok(reference) => {
                    tracing::debug!(
                        media = %reference.id,
                        status = reference.download_status.as_str(),
                        "media candidate recorded, not downloadable"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        message_id = %materialized.message.message_id,
                        media_type = candidate.media_type.as_str(),
                        error = %e,
                        "failed to record media candidate"
                    );
                }
            }
        }

        Ok((IngestOutcome::Accepted, pending))
    }

    /// Resolve a batch of pending media references
    ///
    /// Each reference is handled independently; one failure never stops
    /// the rest, and nothing here can undo the message write.
    pub async fn resolve_media(&self, references: Vec<MediaReference>) {
        for reference in references {
            let token = match self.instances.get(&reference.instance_id) {
                Ok(instance) => instance.map(|i| i.token),
                Err(e) => {
                    tracing::error!(media = %reference.id, error = %e, "instance lookup failed");
                    continue;
                }
            };

            if let Err(e) = self.resolver.resolve(&reference, token.as_ref()).await {
                tracing::error!(media = %reference.id, error = %e, "media resolution failed");
            }
        }
    }
}
