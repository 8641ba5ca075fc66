//! Media resolver: download, decrypt, validate, persist
//!
//! The hardest path in the system. A pending reference is resolved by a
//! chain of strategies: decrypt endpoint, embedded base64, direct-link
//! fallback. Every strategy's output passes the same validation, and a
//! write happens at most once per (message, media type) thanks to the
//! deterministic filename and the existing-file short-circuit. Failures
//! never propagate to the caller's message handling; they end up as a
//! status on the reference row.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use super::gateway::{GatewayClient, GatewayReply, RetryPolicy};
use super::storage::MediaStorage;
use super::{DownloadStatus, MediaType, validate};
use crate::Result;
use crate::db::{MediaReference, MediaRepo};

/// Minimum plausible length of a media key; anything shorter is junk and
/// not worth a network call
const MIN_MEDIA_KEY_LEN: usize = 16;

/// JSON field names the gateway has been observed to hide base64 in
const BASE64_FIELDS: &[&str] = &["fileBase64", "base64", "data", "body", "content", "media"];

/// JSON field names that may carry a direct CDN link
const LINK_FIELDS: &[&str] = &["fileLink", "link", "url", "mediaUrl"];

/// Transport seam for the gateway, so tests can stub the network
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Call the decrypt-and-download endpoint
    async fn download_media(
        &self,
        token: &SecretString,
        media_type: MediaType,
        mimetype: &str,
        media_key: &str,
        direct_path: &str,
    ) -> Result<GatewayReply>;

    /// Fetch a plain CDN link
    async fn fetch_direct(&self, link: &str) -> Result<GatewayReply>;
}

#[async_trait]
impl MediaFetcher for GatewayClient {
    async fn download_media(
        &self,
        token: &SecretString,
        media_type: MediaType,
        mimetype: &str,
        media_key: &str,
        direct_path: &str,
    ) -> Result<GatewayReply> {
        Self::download_media(self, token, media_type, mimetype, media_key, direct_path).await
    }

    async fn fetch_direct(&self, link: &str) -> Result<GatewayReply> {
        Self::fetch_direct(self, link).await
    }
}

/// Outcome of one resolution attempt over all strategies
enum AttemptOutcome {
    Resolved(Vec<u8>),
    Gone,
    Exhausted,
}

/// The media resolver
pub struct MediaResolver {
    fetcher: Arc<dyn MediaFetcher>,
    storage: Arc<dyn MediaStorage>,
    media_repo: MediaRepo,
    retry: RetryPolicy,
}

impl MediaResolver {
    /// Create a resolver
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        storage: Arc<dyn MediaStorage>,
        media_repo: MediaRepo,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            storage,
            media_repo,
            retry,
        }
    }

    /// Resolve one media reference end to end
    ///
    /// Returns the resolved path on success, `None` when the reference
    /// ended in a non-success terminal state. Strategy failures are
    /// recorded on the row; only database errors propagate.
    ///
    /// # Errors
    ///
    /// Returns error if a status update or other database operation fails
    pub async fn resolve(
        &self,
        reference: &MediaReference,
        token: Option<&SecretString>,
    ) -> Result<Option<PathBuf>> {
        let scope = reference.scope();
        match reference.download_status {
            DownloadStatus::Pending => {}
            DownloadStatus::Success => {
                return Ok(reference.file_path.clone().map(PathBuf::from));
            }
            _ => return Ok(None),
        }

        // Structural plausibility before any network call
        if !plausible_fields(reference) {
            tracing::warn!(
                media = %reference.id,
                message_id = %reference.message_id,
                "implausible decryption fields"
            );
            self.media_repo
                .set_status(&reference.id, DownloadStatus::InvalidData, None)?;
            return Ok(None);
        }

        // Idempotent re-delivery: if the deterministic destination (or its
        // legacy flat-layout equivalent) already exists, skip the network
        let file_name = destination_filename(reference);
        let folder = self.storage.path_for(&scope, reference.media_type)?;
        let destination = folder.join(&file_name);

        if self.storage.exists(&destination) {
            tracing::debug!(path = %destination.display(), "destination already present, short-circuit");
            let updated = self.media_repo.set_status(
                &reference.id,
                DownloadStatus::Success,
                Some(&destination.to_string_lossy()),
            )?;
            return Ok(updated.file_path.map(PathBuf::from));
        }
        let legacy = self
            .storage
            .legacy_path_for(&scope, reference.media_type)
            .join(&file_name);
        if self.storage.exists(&legacy) {
            tracing::debug!(path = %legacy.display(), "found in legacy layout, short-circuit");
            let updated = self.media_repo.set_status(
                &reference.id,
                DownloadStatus::Success,
                Some(&legacy.to_string_lossy()),
            )?;
            return Ok(updated.file_path.map(PathBuf::from));
        }

        // No instance credentials is a permanent failure; there is nothing
        // a retry loop could change
        let Some(token) = token else {
            tracing::warn!(media = %reference.id, "no instance credentials, marking failed");
            self.media_repo.increment_retry(&reference.id)?;
            self.media_repo
                .set_status(&reference.id, DownloadStatus::Failed, None)?;
            return Ok(None);
        };

        match self.fetch_with_retries(reference, token).await {
            AttemptOutcome::Resolved(bytes) => {
                self.storage.write_atomic(&destination, &bytes)?;
                let updated = self.media_repo.set_status(
                    &reference.id,
                    DownloadStatus::Success,
                    Some(&destination.to_string_lossy()),
                )?;
                tracing::info!(
                    media = %reference.id,
                    path = %destination.display(),
                    bytes = bytes.len(),
                    "media resolved"
                );
                Ok(updated.file_path.map(PathBuf::from))
            }
            AttemptOutcome::Gone => {
                self.media_repo
                    .set_status(&reference.id, DownloadStatus::Expired, None)?;
                Ok(None)
            }
            AttemptOutcome::Exhausted => {
                self.media_repo.increment_retry(&reference.id)?;
                self.media_repo
                    .set_status(&reference.id, DownloadStatus::Failed, None)?;
                Ok(None)
            }
        }
    }

    /// Run the strategy chain under the bounded retry policy
    async fn fetch_with_retries(
        &self,
        reference: &MediaReference,
        token: &SecretString,
    ) -> AttemptOutcome {
        for attempt in 1..=self.retry.max_attempts {
            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.attempt_once(reference, token).await {
                AttemptOutcome::Exhausted => {
                    tracing::debug!(
                        media = %reference.id,
                        attempt,
                        max = self.retry.max_attempts,
                        "resolution attempt failed"
                    );
                }
                done => return done,
            }
        }
        AttemptOutcome::Exhausted
    }

    /// One pass over the strategy chain: decrypt endpoint, then whatever
    /// fallback link the response or the reference itself offers
    async fn attempt_once(&self, reference: &MediaReference, token: &SecretString) -> AttemptOutcome {
        let mut fallback_link = reference.fallback_url.clone();

        let primary = self
            .fetcher
            .download_media(
                token,
                reference.media_type,
                &reference.mimetype,
                &reference.media_key,
                &reference.direct_path,
            )
            .await;

        match primary {
            Ok(GatewayReply::Gone) => return AttemptOutcome::Gone,
            Ok(GatewayReply::Binary(bytes)) => {
                if self.validate_bytes(reference, &bytes) {
                    return AttemptOutcome::Resolved(bytes);
                }
            }
            Ok(GatewayReply::Json(value)) => {
                // A link in the error response supersedes the one on the
                // reference; the gateway knows the fresher CDN location
                if let Some(link) = LINK_FIELDS
                    .iter()
                    .find_map(|f| value.get(*f).and_then(serde_json::Value::as_str))
                {
                    fallback_link = Some(link.to_string());
                }

                if let Some(encoded) = BASE64_FIELDS
                    .iter()
                    .find_map(|f| value.get(*f).and_then(serde_json::Value::as_str))
                {
                    match validate::decode_base64_payload(encoded) {
                        Ok(bytes) if self.validate_bytes(reference, &bytes) => {
                            return AttemptOutcome::Resolved(bytes);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(media = %reference.id, error = %e, "base64 decode failed");
                        }
                    }
                } else if let Some(err) = value.get("error") {
                    tracing::debug!(media = %reference.id, gateway_error = %err, "gateway reported error");
                }
            }
            Err(e) => {
                tracing::debug!(media = %reference.id, error = %e, "decrypt endpoint call failed");
            }
        }

        // Graceful degradation: direct CDN fetch with the same validation
        if let Some(link) = fallback_link {
            match self.fetcher.fetch_direct(&link).await {
                Ok(GatewayReply::Gone) => return AttemptOutcome::Gone,
                Ok(GatewayReply::Binary(bytes)) => {
                    if self.validate_bytes(reference, &bytes) {
                        return AttemptOutcome::Resolved(bytes);
                    }
                }
                Ok(GatewayReply::Json(_)) => {
                    tracing::debug!(media = %reference.id, "fallback link answered JSON, ignoring");
                }
                Err(e) => {
                    tracing::debug!(media = %reference.id, error = %e, "fallback fetch failed");
                }
            }
        }

        AttemptOutcome::Exhausted
    }

    fn validate_bytes(&self, reference: &MediaReference, bytes: &[u8]) -> bool {
        if let Err(e) = validate::check_magic_number(bytes, &reference.mimetype) {
            tracing::warn!(media = %reference.id, error = %e, "magic-number check failed");
            return false;
        }
        if let Err(e) = validate::check_size_tolerance(bytes.len(), reference.declared_length) {
            tracing::warn!(media = %reference.id, error = %e, "size check failed");
            return false;
        }
        true
    }
}

/// Decryption fields must look like the real thing before we spend a
/// network call on them
fn plausible_fields(reference: &MediaReference) -> bool {
    reference.media_key.len() >= MIN_MEDIA_KEY_LEN && reference.direct_path.starts_with('/')
}

/// Deterministic destination filename for a reference
///
/// Prefers the original filename's stem, else `msg_{shortId}_{timestamp}`;
/// the extension comes from the declared mimetype, falling back to the
/// original filename's extension. Stability across reprocessing is what
/// makes the existing-file short-circuit idempotent.
#[must_use]
pub fn destination_filename(reference: &MediaReference) -> String {
    let mime_ext = validate::extension_for_mime(&reference.mimetype);

    let (stem, original_ext) = reference.file_name.as_deref().map_or_else(
        || {
            let short_id: String = reference
                .message_id
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .take(8)
                .collect();
            let stem = format!("msg_{short_id}_{}", reference.created_at.timestamp());
            (stem, None)
        },
        |name| {
            let sanitized = sanitize_filename(name);
            match sanitized.rsplit_once('.') {
                Some((stem, ext)) if !stem.is_empty() => {
                    (stem.to_string(), Some(format!(".{ext}")))
                }
                _ => (sanitized, None),
            }
        },
    );

    let ext = mime_ext
        .map(String::from)
        .or(original_ext)
        .unwrap_or_else(|| ".bin".to_string());

    format!("{stem}{ext}")
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
