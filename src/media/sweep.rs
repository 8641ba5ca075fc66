//! Background sweeps over the media reference table
//!
//! Two maintenance passes run outside the webhook path. The reprocessing
//! sweep picks up pending and failed references below the retry cap and
//! pushes them through the resolver again. The integrity sweep re-reads
//! files recorded as successful and demotes references whose file is
//! missing or no longer matches its signature; the file itself is never
//! deleted, an operator decides what to do with it.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::resolver::MediaResolver;
use super::{DownloadStatus, validate};
use crate::Result;
use crate::db::{InstanceRepo, MediaReference, MediaRepo};

/// Limits for one sweep run
#[derive(Debug, Clone, Copy)]
pub struct SweepLimits {
    /// References exhausted beyond this retry count are left alone
    pub max_retries: i64,
    /// Rows examined per run
    pub batch_size: usize,
}

impl Default for SweepLimits {
    fn default() -> Self {
        Self {
            max_retries: 5,
            batch_size: 100,
        }
    }
}

/// Tally of one sweep run, logged at the end
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub recovered: usize,
    pub still_failed: usize,
    pub corrupted: usize,
    pub intact: usize,
}

/// Runs the reprocessing and integrity sweeps
pub struct MediaSweeper {
    media: MediaRepo,
    instances: InstanceRepo,
    resolver: Arc<MediaResolver>,
}

impl MediaSweeper {
    /// Create a sweeper
    #[must_use]
    pub fn new(media: MediaRepo, instances: InstanceRepo, resolver: Arc<MediaResolver>) -> Self {
        Self {
            media,
            instances,
            resolver,
        }
    }

    /// Re-run the resolver over pending and failed references
    ///
    /// Failed references are first reset to pending (the one backward
    /// transition the state machine allows), then resolved like any other.
    ///
    /// # Errors
    ///
    /// Returns error if a database operation fails; individual download
    /// failures are counted, not propagated
    pub async fn reprocess(&self, limits: SweepLimits) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for stale in self.media.list_reprocessable(limits.max_retries, limits.batch_size)? {
            report.examined += 1;

            let reference = if stale.download_status == DownloadStatus::Failed {
                self.media.set_status(&stale.id, DownloadStatus::Pending, None)?
            } else {
                stale
            };

            let token = self
                .instances
                .get(&reference.instance_id)?
                .map(|instance| instance.token);

            match self.resolver.resolve(&reference, token.as_ref()).await? {
                Some(path) => {
                    tracing::info!(media = %reference.id, path = %path.display(), "reprocess recovered media");
                    report.recovered += 1;
                }
                None => report.still_failed += 1,
            }
        }

        tracing::info!(
            examined = report.examined,
            recovered = report.recovered,
            still_failed = report.still_failed,
            "reprocess sweep finished"
        );
        Ok(report)
    }

    /// Re-verify files recorded as successfully downloaded
    ///
    /// A missing file, a magic-number mismatch, or a checksum mismatch
    /// demotes the reference to corrupted. The file stays on disk.
    ///
    /// # Errors
    ///
    /// Returns error if a database operation fails
    pub fn verify_integrity(&self, limits: SweepLimits) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for reference in self.media.list_successful(limits.batch_size)? {
            report.examined += 1;

            if self.check_file(&reference) {
                report.intact += 1;
            } else {
                self.media
                    .set_status(&reference.id, DownloadStatus::Corrupted, None)?;
                report.corrupted += 1;
            }
        }

        tracing::info!(
            examined = report.examined,
            intact = report.intact,
            corrupted = report.corrupted,
            "integrity sweep finished"
        );
        Ok(report)
    }

    fn check_file(&self, reference: &MediaReference) -> bool {
        let Some(path) = reference.file_path.as_deref() else {
            tracing::warn!(media = %reference.id, "successful reference has no file path");
            return false;
        };

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(media = %reference.id, path, error = %e, "stored file unreadable");
                return false;
            }
        };

        if let Err(e) = validate::check_magic_number(&bytes, &reference.mimetype) {
            tracing::warn!(media = %reference.id, path, error = %e, "stored file fails signature check");
            return false;
        }

        if !checksum_matches(&bytes, &reference.file_sha256) {
            tracing::warn!(media = %reference.id, path, "stored file fails checksum check");
            return false;
        }

        true
    }
}

/// Compare file bytes against the upstream SHA-256, when one is usable
///
/// The upstream value arrives base64-encoded (occasionally hex). Anything
/// that does not decode to a 32-byte digest is unusable and skips the
/// check rather than condemning the file.
fn checksum_matches(bytes: &[u8], declared: &str) -> bool {
    let declared = declared.trim();
    if declared.is_empty() {
        return true;
    }

    let digest = Sha256::digest(bytes);

    if let Ok(decoded) = validate::decode_base64_payload(declared) {
        if decoded.len() == 32 {
            return decoded.as_slice() == digest.as_slice();
        }
    }
    if declared.len() == 64 {
        if let Ok(decoded) = hex::decode(declared) {
            return decoded.as_slice() == digest.as_slice();
        }
    }

    tracing::debug!("declared checksum not decodable, skipping comparison");
    true
}
