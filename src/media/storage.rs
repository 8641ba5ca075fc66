//! Storage backend and folder/path resolution
//!
//! Paths are deterministic pure functions of (client, instance, chat,
//! media type): recomputing them always yields the same location, which
//! is what makes idempotent short-circuiting on re-delivery work. The
//! backend is a trait so the same resolve/validate/fallback logic runs
//! against any store; production uses the local filesystem.

use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;

use super::MediaType;
use crate::ingest::identity::normalize_chat_id;
use crate::{Error, Result};

/// Root folder under the storage base directory
const MEDIA_ROOT: &str = "media_storage";

/// Directories kept in the in-process path cache
const PATH_CACHE_SIZE: usize = 512;

/// Tenant/instance/chat coordinates of a media write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaScope {
    pub client_id: String,
    pub instance_id: String,
    /// Canonical chat id from the identity resolver
    pub chat_id: String,
}

/// Capability surface the media resolver needs from a store
pub trait MediaStorage: Send + Sync {
    /// Directory for a (scope, media type) pair, created on demand
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    fn path_for(&self, scope: &MediaScope, media_type: MediaType) -> Result<PathBuf>;

    /// Legacy flat directory (pre-chat-scoping layout), never created
    fn legacy_path_for(&self, scope: &MediaScope, media_type: MediaType) -> PathBuf;

    /// Whether a destination file already exists
    fn exists(&self, path: &Path) -> bool;

    /// Write bytes so that readers never observe a partial file
    ///
    /// # Errors
    ///
    /// Returns error if the write or rename fails
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()>;
}

/// Filesystem-safe folder name for a canonical chat id
///
/// Re-derives the group/private classification so the function stays a
/// pure mapping even when handed a raw id.
#[must_use]
pub fn chat_folder_name(chat_id: &str) -> String {
    if chat_id.starts_with("group_") {
        return chat_id.to_string();
    }
    normalize_chat_id(chat_id).id
}

/// Local filesystem storage with an in-process folder cache
pub struct LocalStorage {
    base_dir: PathBuf,
    /// Caches directories already created this process, so the hot path
    /// skips repeated mkdir syscalls
    created: Mutex<LruCache<PathBuf, ()>>,
}

impl LocalStorage {
    /// Create a local storage backend rooted at `base_dir`
    #[must_use]
    pub fn new(base_dir: PathBuf) -> Self {
        let capacity = NonZeroUsize::new(PATH_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            base_dir,
            created: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn chat_dir(&self, scope: &MediaScope, media_type: MediaType) -> PathBuf {
        self.base_dir
            .join(MEDIA_ROOT)
            .join(format!("client_{}", scope.client_id))
            .join(format!("instance_{}", scope.instance_id))
            .join("chats")
            .join(chat_folder_name(&scope.chat_id))
            .join(media_type.folder_name())
    }
}

impl MediaStorage for LocalStorage {
    fn path_for(&self, scope: &MediaScope, media_type: MediaType) -> Result<PathBuf> {
        let dir = self.chat_dir(scope, media_type);

        {
            let mut cache = self.created.lock().map_err(|_| {
                Error::Storage("path cache poisoned".to_string())
            })?;
            if cache.get(&dir).is_some() {
                return Ok(dir);
            }
        }

        // mkdir-if-absent: two workers racing to create the same folder
        // are both fine
        std::fs::create_dir_all(&dir)?;

        let mut cache = self.created.lock().map_err(|_| {
            Error::Storage("path cache poisoned".to_string())
        })?;
        cache.put(dir.clone(), ());
        Ok(dir)
    }

    fn legacy_path_for(&self, scope: &MediaScope, media_type: MediaType) -> PathBuf {
        self.base_dir
            .join(MEDIA_ROOT)
            .join(format!("client_{}", scope.client_id))
            .join(format!("instance_{}", scope.instance_id))
            .join(media_type.folder_name())
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| Error::Storage(format!("destination {} has no parent", path.display())))?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(bytes)?;
        temp.flush()?;

        let written = temp.as_file().metadata()?.len();
        if written != bytes.len() as u64 {
            return Err(Error::Storage(format!(
                "short write: {written} of {} bytes",
                bytes.len()
            )));
        }

        // First writer wins; a concurrent writer that already renamed the
        // same destination into place is success, not a conflict
        match temp.persist_noclobber(path) {
            Ok(_) => Ok(()),
            Err(e) if path.is_file() => {
                tracing::debug!(path = %path.display(), error = %e.error, "destination already written");
                Ok(())
            }
            Err(e) => Err(Error::Io(e.error)),
        }
    }
}
