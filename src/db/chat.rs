//! Chat repository
//!
//! Chats are created lazily on first message and refreshed on every
//! subsequent one. Last-message timestamps are last-write-wins; display
//! name and photo only ever get richer, never emptier.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use super::instance::parse_datetime;
use crate::{Error, Result};

/// A conversation, keyed by (client, normalized chat id)
#[derive(Debug, Clone)]
pub struct Chat {
    pub id: String,
    pub client_id: String,
    pub chat_id: String,
    pub name: String,
    pub photo_url: Option<String>,
    pub is_group: bool,
    pub status: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Chat repository
#[derive(Clone)]
pub struct ChatRepo {
    pool: DbPool,
}

impl ChatRepo {
    /// Create a new chat repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Find a chat by its normalized id within a tenant
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, client_id: &str, chat_id: &str) -> Result<Option<Chat>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let chat = conn
            .query_row(
                "SELECT id, client_id, chat_id, name, photo_url, is_group, status,
                        last_message_at, created_at, updated_at
                 FROM chats WHERE client_id = ?1 AND chat_id = ?2",
                [client_id, chat_id],
                map_chat_row,
            )
            .ok();

        Ok(chat)
    }

    /// Create or refresh a chat for an incoming message
    ///
    /// The last-message timestamp is always refreshed. Name and photo are
    /// refreshed only when the candidate is non-empty, so a payload with
    /// sparse identity fields never erases what a richer one established.
    /// Group classification is set at creation and never flipped.
    ///
    /// Insert-or-ignore first: two workers delivering the first messages
    /// of a brand-new chat both reach the INSERT, the loser's is a no-op
    /// and falls through to the refresh branch instead of erroring.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn upsert_on_message(
        &self,
        client_id: &str,
        chat_id: &str,
        is_group: bool,
        name: &str,
        photo_url: Option<&str>,
        message_at: DateTime<Utc>,
    ) -> Result<Chat> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        let at = message_at.to_rfc3339();

        let id = Uuid::new_v4().to_string();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO chats (id, client_id, chat_id, name, photo_url, is_group,
                                              status, last_message_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?8, ?8)",
                rusqlite::params![&id, client_id, chat_id, name, photo_url, is_group, &at, &now],
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        if inserted == 1 {
            return Ok(Chat {
                id,
                client_id: client_id.to_string(),
                chat_id: chat_id.to_string(),
                name: name.to_string(),
                photo_url: photo_url.map(String::from),
                is_group,
                status: "active".to_string(),
                last_message_at: Some(message_at),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            });
        }

        // The row exists (created earlier or by a concurrent worker);
        // refresh it
        let chat = conn
            .query_row(
                "SELECT id, client_id, chat_id, name, photo_url, is_group, status,
                        last_message_at, created_at, updated_at
                 FROM chats WHERE client_id = ?1 AND chat_id = ?2",
                [client_id, chat_id],
                map_chat_row,
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let new_name = if name.is_empty() { chat.name.as_str() } else { name };
        let new_photo = photo_url
            .filter(|p| !p.is_empty())
            .or(chat.photo_url.as_deref());

        conn.execute(
            "UPDATE chats SET name = ?1, photo_url = ?2, last_message_at = ?3, updated_at = ?4
             WHERE id = ?5",
            rusqlite::params![new_name, new_photo, &at, &now, &chat.id],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Chat {
            name: new_name.to_string(),
            photo_url: new_photo.map(String::from),
            last_message_at: Some(message_at),
            ..chat
        })
    }
}

fn map_chat_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        client_id: row.get(1)?,
        chat_id: row.get(2)?,
        name: row.get(3)?,
        photo_url: row.get(4)?,
        is_group: row.get(5)?,
        status: row.get(6)?,
        last_message_at: row
            .get::<_, Option<String>>(7)?
            .map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}
