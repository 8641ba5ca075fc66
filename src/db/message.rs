//! Message repository
//!
//! The upstream message id is globally unique; duplicate delivery of the
//! same id (including two near-simultaneous deliveries) must collapse to
//! a single row. The UNIQUE constraint is the sole concurrency safeguard,
//! so constraint violations on insert are downgraded to a duplicate
//! outcome rather than propagated.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use super::instance::parse_datetime;
use crate::{Error, Result};

/// Classified kind of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Poll,
    Unknown,
}

impl MessageKind {
    /// Stable string form used in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::Poll => "poll",
            Self::Unknown => "unknown",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "document" => Some(Self::Document),
            "sticker" => Some(Self::Sticker),
            "location" => Some(Self::Location),
            "poll" => Some(Self::Poll),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// A persisted message
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub client_id: String,
    pub chat_row_id: String,
    pub sender_row_id: Option<String>,
    /// Upstream message id (globally unique)
    pub message_id: String,
    pub kind: MessageKind,
    pub content: String,
    pub from_me: bool,
    pub timestamp: DateTime<Utc>,
    pub location_json: Option<String>,
    pub poll_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an idempotent insert
#[derive(Debug)]
pub enum InsertOutcome {
    Created(Message),
    /// A row with this upstream message id already exists
    Duplicate,
}

/// Fields for a new message row
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub client_id: &'a str,
    pub chat_row_id: &'a str,
    pub sender_row_id: Option<&'a str>,
    pub message_id: &'a str,
    pub kind: MessageKind,
    pub content: &'a str,
    pub from_me: bool,
    pub timestamp: DateTime<Utc>,
    pub location_json: Option<&'a str>,
    pub poll_json: Option<&'a str>,
}

/// Message repository
#[derive(Clone)]
pub struct MessageRepo {
    pool: DbPool,
}

impl MessageRepo {
    /// Create a new message repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Whether a message with this upstream id already exists
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn exists(&self, message_id: &str) -> Result<bool> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE message_id = ?1",
                [message_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(count > 0)
    }

    /// Insert a message, treating a unique-constraint hit as a duplicate
    ///
    /// Two workers racing on the same upstream id both reach the INSERT;
    /// the loser gets `InsertOutcome::Duplicate`, not an error.
    ///
    /// # Errors
    ///
    /// Returns error if a non-constraint database operation fails
    pub fn insert(&self, new: &NewMessage<'_>) -> Result<InsertOutcome> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let result = conn.execute(
            "INSERT INTO messages (id, client_id, chat_row_id, sender_row_id, message_id,
                                   kind, content, from_me, timestamp, location_json,
                                   poll_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                &id,
                new.client_id,
                new.chat_row_id,
                new.sender_row_id,
                new.message_id,
                new.kind.as_str(),
                new.content,
                new.from_me,
                new.timestamp.to_rfc3339(),
                new.location_json,
                new.poll_json,
                now.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Created(Message {
                id,
                client_id: new.client_id.to_string(),
                chat_row_id: new.chat_row_id.to_string(),
                sender_row_id: new.sender_row_id.map(String::from),
                message_id: new.message_id.to_string(),
                kind: new.kind,
                content: new.content.to_string(),
                from_me: new.from_me,
                timestamp: new.timestamp,
                location_json: new.location_json.map(String::from),
                poll_json: new.poll_json.map(String::from),
                created_at: now,
            })),
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!(message_id = new.message_id, "duplicate message insert");
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(Error::Sqlite(e)),
        }
    }

    /// Fetch a message by its upstream id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get_by_upstream_id(&self, message_id: &str) -> Result<Option<Message>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let message = conn
            .query_row(
                "SELECT id, client_id, chat_row_id, sender_row_id, message_id, kind, content,
                        from_me, timestamp, location_json, poll_json, created_at
                 FROM messages WHERE message_id = ?1",
                [message_id],
                map_message_row,
            )
            .ok();

        Ok(message)
    }

    /// Messages for a chat after a timestamp, oldest first
    ///
    /// This is the collaborator query surface for the REST layer.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_for_chat_after(
        &self,
        chat_row_id: &str,
        after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let after = after.map_or_else(String::new, |t| t.to_rfc3339());

        let mut stmt = conn
            .prepare(
                "SELECT id, client_id, chat_row_id, sender_row_id, message_id, kind, content,
                        from_me, timestamp, location_json, poll_json, created_at
                 FROM messages WHERE chat_row_id = ?1 AND timestamp > ?2
                 ORDER BY timestamp ASC LIMIT ?3",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        #[allow(clippy::cast_possible_wrap)]
        let messages = stmt
            .query_map(rusqlite::params![chat_row_id, &after, limit as i64], map_message_row)
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(messages)
    }
}

/// Whether a rusqlite error is the upstream-id UNIQUE index firing
///
/// Other integrity violations (CHECK, NOT NULL, foreign keys) must
/// propagate rather than collapse into a duplicate outcome.
fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, Some(message))
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && message.contains("UNIQUE constraint failed: messages.message_id")
    )
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        client_id: row.get(1)?,
        chat_row_id: row.get(2)?,
        sender_row_id: row.get(3)?,
        message_id: row.get(4)?,
        kind: MessageKind::from_str(&row.get::<_, String>(5)?).unwrap_or(MessageKind::Unknown),
        content: row.get(6)?,
        from_me: row.get(7)?,
        timestamp: parse_datetime(&row.get::<_, String>(8)?),
        location_json: row.get(9)?,
        poll_json: row.get(10)?,
        created_at: parse_datetime(&row.get::<_, String>(11)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ChatRepo, ClientRepo, init_memory};

    fn setup() -> (MessageRepo, String, String) {
        let pool = init_memory().unwrap();
        let client = ClientRepo::new(pool.clone()).create("Acme").unwrap();
        let chat = ChatRepo::new(pool.clone())
            .upsert_on_message(&client.id, "5511999998888", false, "Maria", None, Utc::now())
            .unwrap();
        (MessageRepo::new(pool), client.id, chat.id)
    }

    fn new_message<'a>(client_id: &'a str, chat_row_id: &'a str, message_id: &'a str) -> NewMessage<'a> {
        NewMessage {
            client_id,
            chat_row_id,
            sender_row_id: None,
            message_id,
            kind: MessageKind::Text,
            content: "hello",
            from_me: false,
            timestamp: Utc::now(),
            location_json: None,
            poll_json: None,
        }
    }

    #[test]
    fn test_duplicate_insert_is_not_an_error() {
        let (repo, client_id, chat_row_id) = setup();

        let first = repo.insert(&new_message(&client_id, &chat_row_id, "ABC123")).unwrap();
        assert!(matches!(first, InsertOutcome::Created(_)));

        let second = repo.insert(&new_message(&client_id, &chat_row_id, "ABC123")).unwrap();
        assert!(matches!(second, InsertOutcome::Duplicate));
    }

    #[test]
    fn test_only_upstream_id_unique_hits_are_duplicates() {
        let unique = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: messages.message_id".to_string()),
        );
        assert!(is_unique_violation(&unique));

        let check = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_CHECK),
            Some("CHECK constraint failed: kind".to_string()),
        );
        assert!(!is_unique_violation(&check));

        let other_unique = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: chats.client_id, chats.chat_id".to_string()),
        );
        assert!(!is_unique_violation(&other_unique));
    }

    #[test]
    fn test_list_after_timestamp() {
        let (repo, client_id, chat_row_id) = setup();

        let mut early = new_message(&client_id, &chat_row_id, "M1");
        early.timestamp = Utc::now() - chrono::Duration::hours(2);
        repo.insert(&early).unwrap();

        let late = new_message(&client_id, &chat_row_id, "M2");
        repo.insert(&late).unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let messages = repo.list_for_chat_after(&chat_row_id, Some(cutoff), 50).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, "M2");

        let all = repo.list_for_chat_after(&chat_row_id, None, 50).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message_id, "M1");
    }

    #[test]
    fn test_exists() {
        let (repo, client_id, chat_row_id) = setup();

        assert!(!repo.exists("ABC123").unwrap());
        repo.insert(&new_message(&client_id, &chat_row_id, "ABC123")).unwrap();
        assert!(repo.exists("ABC123").unwrap());
    }
}
