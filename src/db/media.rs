//! Media reference repository
//!
//! One row per detected attachment. The download status is a forward-only
//! state machine; every mutation goes through [`MediaRepo::set_status`] so
//! illegal backward transitions are rejected in one place.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use super::instance::parse_datetime;
use crate::media::{DownloadStatus, MediaCandidate, MediaScope, MediaType};
use crate::{Error, Result};

/// A persisted media attachment reference
#[derive(Debug, Clone)]
pub struct MediaReference {
    pub id: String,
    /// Upstream message id this attachment belongs to
    pub message_id: String,
    pub client_id: String,
    pub instance_id: String,
    /// Canonical chat id, as resolved at ingest time
    pub chat_id: String,
    pub media_type: MediaType,
    pub mimetype: String,
    pub declared_length: Option<i64>,
    pub caption: String,
    pub media_key: String,
    pub direct_path: String,
    pub file_sha256: String,
    pub file_enc_sha256: String,
    pub fallback_url: Option<String>,
    pub file_name: Option<String>,
    /// Type-specific extras (dimensions, duration, page count, flags)
    pub extra_json: String,
    pub file_path: Option<String>,
    pub download_status: DownloadStatus,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaReference {
    /// Storage coordinates recorded at ingest time
    #[must_use]
    pub fn scope(&self) -> MediaScope {
        MediaScope {
            client_id: self.client_id.clone(),
            instance_id: self.instance_id.clone(),
            chat_id: self.chat_id.clone(),
        }
    }
}

/// Media reference repository
#[derive(Clone)]
pub struct MediaRepo {
    pool: DbPool,
}

impl MediaRepo {
    /// Create a new media repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record an extracted candidate for a message
    ///
    /// Idempotent per (message id, media type): re-delivery of the same
    /// webhook returns the existing row untouched. Candidates with
    /// incomplete decryption fields are recorded as `invalid_data` so the
    /// audit trail survives even though they are never downloaded.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn record_candidate(
        &self,
        scope: &MediaScope,
        message_id: &str,
        candidate: &MediaCandidate,
    ) -> Result<MediaReference> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        if let Some(existing) = find_on(&conn, message_id, candidate.media_type) {
            return Ok(existing);
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let status = if candidate.valid_for_download() {
            DownloadStatus::Pending
        } else {
            DownloadStatus::InvalidData
        };
        let extra_json = serde_json::to_string(&candidate.extra)?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO media_references
                 (id, message_id, client_id, instance_id, chat_id, media_type, mimetype,
                  declared_length, caption, media_key, direct_path, file_sha256,
                  file_enc_sha256, fallback_url, file_name, extra_json, download_status,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18, ?18)",
            rusqlite::params![
                &id,
                message_id,
                &scope.client_id,
                &scope.instance_id,
                &scope.chat_id,
                candidate.media_type.as_str(),
                &candidate.mimetype,
                candidate.declared_length,
                &candidate.caption,
                &candidate.media_key,
                &candidate.direct_path,
                &candidate.file_sha256,
                &candidate.file_enc_sha256,
                candidate.fallback_url.as_deref(),
                candidate.file_name.as_deref(),
                &extra_json,
                status.as_str(),
                &now,
            ],
        )?;

        if inserted == 0 {
            // Lost the race to a concurrent worker; return its row
            return find_on(&conn, message_id, candidate.media_type)
                .ok_or_else(|| Error::Database("media row vanished after conflict".to_string()));
        }

        find_on(&conn, message_id, candidate.media_type)
            .ok_or_else(|| Error::Database("media row missing after insert".to_string()))
    }

    /// Find a reference by (upstream message id, media type)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, message_id: &str, media_type: MediaType) -> Result<Option<MediaReference>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        Ok(find_on(&conn, message_id, media_type))
    }

    /// Fetch a reference by row id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: &str) -> Result<Option<MediaReference>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let reference = conn
            .query_row(&format!("{SELECT_MEDIA} WHERE id = ?1"), [id], map_media_row)
            .ok();

        Ok(reference)
    }

    /// All references for a message (collaborator query surface)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_for_message(&self, message_id: &str) -> Result<Vec<MediaReference>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(&format!("{SELECT_MEDIA} WHERE message_id = ?1 ORDER BY created_at"))
            .map_err(|e| Error::Database(e.to_string()))?;

        let references = stmt
            .query_map([message_id], map_media_row)
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(references)
    }

    /// Transition a reference to a new status, optionally recording a path
    ///
    /// Rejects backward transitions; the persisted state machine is
    /// forward-only except for the reprocessing reset.
    ///
    /// # Errors
    ///
    /// Returns error if the transition is not permitted or the row is
    /// missing
    pub fn set_status(
        &self,
        id: &str,
        status: DownloadStatus,
        file_path: Option<&str>,
    ) -> Result<MediaReference> {
        let current = self
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("media reference {id}")))?;

        if !current.download_status.can_transition_to(status) {
            return Err(Error::Media(format!(
                "illegal status transition {} -> {} for media {id}",
                current.download_status.as_str(),
                status.as_str()
            )));
        }

        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let path = file_path.map(String::from).or(current.file_path.clone());
        conn.execute(
            "UPDATE media_references SET download_status = ?1, file_path = ?2, updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![status.as_str(), path.as_deref(), &Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(MediaReference {
            download_status: status,
            file_path: path,
            ..current
        })
    }

    /// Bump the retry counter after a failed attempt
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn increment_retry(&self, id: &str) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "UPDATE media_references
             SET retry_count = retry_count + 1, updated_at = ?1 WHERE id = ?2",
            [&Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    /// References eligible for the reprocessing sweep
    ///
    /// Pending or failed references below the retry cap, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_reprocessable(&self, max_retries: i64, limit: usize) -> Result<Vec<MediaReference>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_MEDIA} WHERE download_status IN ('pending', 'failed')
                 AND retry_count < ?1 ORDER BY updated_at ASC LIMIT ?2"
            ))
            .map_err(|e| Error::Database(e.to_string()))?;

        #[allow(clippy::cast_possible_wrap)]
        let references = stmt
            .query_map(rusqlite::params![max_retries, limit as i64], map_media_row)
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(references)
    }

    /// Successfully downloaded references, for the integrity sweep
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_successful(&self, limit: usize) -> Result<Vec<MediaReference>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_MEDIA} WHERE download_status = 'success'
                 ORDER BY updated_at ASC LIMIT ?1"
            ))
            .map_err(|e| Error::Database(e.to_string()))?;

        #[allow(clippy::cast_possible_wrap)]
        let references = stmt
            .query_map([limit as i64], map_media_row)
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(references)
    }
}

/// Lookup on an already-acquired connection; `record_candidate` must not
/// grab a second one from the pool mid-flight
fn find_on(
    conn: &rusqlite::Connection,
    message_id: &str,
    media_type: MediaType,
) -> Option<MediaReference> {
    conn.query_row(
        &format!("{SELECT_MEDIA} WHERE message_id = ?1 AND media_type = ?2"),
        [message_id, media_type.as_str()],
        map_media_row,
    )
    .ok()
}

const SELECT_MEDIA: &str = "SELECT id, message_id, client_id, instance_id, chat_id, media_type,
        mimetype, declared_length, caption, media_key, direct_path, file_sha256,
        file_enc_sha256, fallback_url, file_name, extra_json, file_path, download_status,
        retry_count, created_at, updated_at
 FROM media_references";

fn map_media_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaReference> {
    Ok(MediaReference {
        id: row.get(0)?,
        message_id: row.get(1)?,
        client_id: row.get(2)?,
        instance_id: row.get(3)?,
        chat_id: row.get(4)?,
        media_type: MediaType::from_str(&row.get::<_, String>(5)?).unwrap_or(MediaType::Document),
        mimetype: row.get(6)?,
        declared_length: row.get(7)?,
        caption: row.get(8)?,
        media_key: row.get(9)?,
        direct_path: row.get(10)?,
        file_sha256: row.get(11)?,
        file_enc_sha256: row.get(12)?,
        fallback_url: row.get(13)?,
        file_name: row.get(14)?,
        extra_json: row.get(15)?,
        file_path: row.get(16)?,
        download_status: DownloadStatus::from_str(&row.get::<_, String>(17)?)
            .unwrap_or(DownloadStatus::Pending),
        retry_count: row.get(18)?,
        created_at: parse_datetime(&row.get::<_, String>(19)?),
        updated_at: parse_datetime(&row.get::<_, String>(20)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;
    use crate::media::extract::MediaExtra;

    fn scope() -> MediaScope {
        MediaScope {
            client_id: "c1".to_string(),
            instance_id: "i1".to_string(),
            chat_id: "5511999998888".to_string(),
        }
    }

    /// In-memory pool with the tenant row the scope points at
    fn repo() -> MediaRepo {
        let pool = init_memory().unwrap();
        pool.get()
            .unwrap()
            .execute("INSERT INTO clients (id, name) VALUES ('c1', 'Acme')", [])
            .unwrap();
        MediaRepo::new(pool)
    }

    fn candidate() -> MediaCandidate {
        MediaCandidate {
            media_type: MediaType::Image,
            mimetype: "image/jpeg".to_string(),
            declared_length: Some(2048),
            caption: "a photo".to_string(),
            media_key: "k".repeat(32),
            direct_path: "/v/t62.7118-24/abc".to_string(),
            file_sha256: "aaa".to_string(),
            file_enc_sha256: "bbb".to_string(),
            fallback_url: None,
            file_name: None,
            extra: MediaExtra::default(),
        }
    }

    #[test]
    fn test_record_is_idempotent() {
        let repo = repo();

        let first = repo.record_candidate(&scope(), "MSG1", &candidate()).unwrap();
        assert_eq!(first.download_status, DownloadStatus::Pending);

        let second = repo.record_candidate(&scope(), "MSG1", &candidate()).unwrap();
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn test_incomplete_candidate_recorded_invalid() {
        let repo = repo();

        let mut c = candidate();
        c.media_key = String::new();
        let reference = repo.record_candidate(&scope(), "MSG2", &c).unwrap();
        assert_eq!(reference.download_status, DownloadStatus::InvalidData);
    }

    #[test]
    fn test_forward_only_transitions() {
        let repo = repo();
        let reference = repo.record_candidate(&scope(), "MSG3", &candidate()).unwrap();

        let ok = repo
            .set_status(&reference.id, DownloadStatus::Success, Some("/tmp/x.jpg"))
            .unwrap();
        assert_eq!(ok.file_path.as_deref(), Some("/tmp/x.jpg"));

        // success -> pending must be rejected
        assert!(repo.set_status(&reference.id, DownloadStatus::Pending, None).is_err());

        // success -> corrupted (integrity sweep) is allowed, file retained
        let corrupted = repo
            .set_status(&reference.id, DownloadStatus::Corrupted, None)
            .unwrap();
        assert_eq!(corrupted.file_path.as_deref(), Some("/tmp/x.jpg"));
    }

    #[test]
    fn test_reprocessable_listing() {
        let repo = repo();

        let r1 = repo.record_candidate(&scope(), "MSG4", &candidate()).unwrap();
        repo.set_status(&r1.id, DownloadStatus::Failed, None).unwrap();

        let r2 = repo.record_candidate(&scope(), "MSG5", &candidate()).unwrap();
        repo.set_status(&r2.id, DownloadStatus::Success, Some("/tmp/y.jpg"))
            .unwrap();

        let eligible = repo.list_reprocessable(5, 10).unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, r1.id);

        // Retry cap excludes exhausted references
        for _ in 0..5 {
            repo.increment_retry(&r1.id).unwrap();
        }
        assert!(repo.list_reprocessable(5, 10).unwrap().is_empty());
    }
}
