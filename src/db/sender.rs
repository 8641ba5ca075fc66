//! Sender repository
//!
//! Senders are upserted on every message; counters track volume per
//! sender for the dashboard collaborator.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use super::instance::parse_datetime;
use crate::{Error, Result};

/// A message author, keyed by (client, sender id)
#[derive(Debug, Clone)]
pub struct Sender {
    pub id: String,
    pub client_id: String,
    pub sender_id: String,
    pub push_name: String,
    pub verified_name: String,
    pub is_business: bool,
    pub photo_url: Option<String>,
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sender repository
#[derive(Clone)]
pub struct SenderRepo {
    pool: DbPool,
}

impl SenderRepo {
    /// Create a new sender repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Find a sender within a tenant
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, client_id: &str, sender_id: &str) -> Result<Option<Sender>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let sender = conn
            .query_row(
                "SELECT id, client_id, sender_id, push_name, verified_name, is_business,
                        photo_url, message_count, created_at, updated_at
                 FROM senders WHERE client_id = ?1 AND sender_id = ?2",
                [client_id, sender_id],
                map_sender_row,
            )
            .ok();

        Ok(sender)
    }

    /// Create or refresh a sender for an incoming message
    ///
    /// Names are refreshed only when the candidate is non-empty; the
    /// message counter is incremented on every call.
    ///
    /// Insert-or-ignore first, so a worker losing the first-message race
    /// falls through to the refresh branch instead of erroring.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn upsert_on_message(
        &self,
        client_id: &str,
        sender_id: &str,
        push_name: &str,
        verified_name: &str,
        is_business: bool,
        photo_url: Option<&str>,
    ) -> Result<Sender> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        let id = Uuid::new_v4().to_string();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO senders (id, client_id, sender_id, push_name,
                                                verified_name, is_business, photo_url,
                                                message_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)",
                rusqlite::params![
                    &id,
                    client_id,
                    sender_id,
                    push_name,
                    verified_name,
                    is_business,
                    photo_url,
                    &now
                ],
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        if inserted == 1 {
            return Ok(Sender {
                id,
                client_id: client_id.to_string(),
                sender_id: sender_id.to_string(),
                push_name: push_name.to_string(),
                verified_name: verified_name.to_string(),
                is_business,
                photo_url: photo_url.map(String::from),
                message_count: 1,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            });
        }

        // The row exists (created earlier or by a concurrent worker);
        // refresh it
        let sender = conn
            .query_row(
                "SELECT id, client_id, sender_id, push_name, verified_name, is_business,
                        photo_url, message_count, created_at, updated_at
                 FROM senders WHERE client_id = ?1 AND sender_id = ?2",
                [client_id, sender_id],
                map_sender_row,
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let new_push = if push_name.is_empty() {
            sender.push_name.as_str()
        } else {
            push_name
        };
        let new_verified = if verified_name.is_empty() {
            sender.verified_name.as_str()
        } else {
            verified_name
        };
        let new_photo = photo_url
            .filter(|p| !p.is_empty())
            .or(sender.photo_url.as_deref());

        conn.execute(
            "UPDATE senders
             SET push_name = ?1, verified_name = ?2, is_business = ?3, photo_url = ?4,
                 message_count = message_count + 1, updated_at = ?5
             WHERE id = ?6",
            rusqlite::params![
                new_push,
                new_verified,
                is_business || sender.is_business,
                new_photo,
                &now,
                &sender.id
            ],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Sender {
            push_name: new_push.to_string(),
            verified_name: new_verified.to_string(),
            is_business: is_business || sender.is_business,
            photo_url: new_photo.map(String::from),
            message_count: sender.message_count + 1,
            ..sender
        })
    }
}

fn map_sender_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sender> {
    Ok(Sender {
        id: row.get(0)?,
        client_id: row.get(1)?,
        sender_id: row.get(2)?,
        push_name: row.get(3)?,
        verified_name: row.get(4)?,
        is_business: row.get(5)?,
        photo_url: row.get(6)?,
        message_count: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ClientRepo, init_memory};

    fn setup() -> (SenderRepo, String) {
        let pool = init_memory().unwrap();
        let client = ClientRepo::new(pool.clone()).create("Acme").unwrap();
        (SenderRepo::new(pool), client.id)
    }

    #[test]
    fn test_counter_increments() {
        let (repo, client_id) = setup();

        let s1 = repo
            .upsert_on_message(&client_id, "5511988887777", "João", "", false, None)
            .unwrap();
        assert_eq!(s1.message_count, 1);

        let s2 = repo
            .upsert_on_message(&client_id, "5511988887777", "João", "", false, None)
            .unwrap();
        assert_eq!(s2.id, s1.id);
        assert_eq!(s2.message_count, 2);
    }

    #[test]
    fn test_upsert_refreshes_row_inserted_by_another_worker() {
        let pool = init_memory().unwrap();
        let client = ClientRepo::new(pool.clone()).create("Acme").unwrap();
        let repo = SenderRepo::new(pool.clone());

        // Another worker wins the insert; the repo has never seen this row
        {
            let conn = pool.get().unwrap();
            conn.execute(
                "INSERT INTO senders (id, client_id, sender_id, push_name, verified_name,
                                      is_business, photo_url, message_count, created_at,
                                      updated_at)
                 VALUES ('row-1', ?1, '5511988887777', 'João', '', 0, NULL, 1, ?2, ?2)",
                rusqlite::params![&client.id, Utc::now().to_rfc3339()],
            )
            .unwrap();
        }

        let sender = repo
            .upsert_on_message(&client.id, "5511988887777", "", "João Ltda", false, None)
            .unwrap();

        assert_eq!(sender.id, "row-1");
        assert_eq!(sender.push_name, "João");
        assert_eq!(sender.verified_name, "João Ltda");
        assert_eq!(sender.message_count, 2);
    }

    #[test]
    fn test_names_only_get_richer() {
        let (repo, client_id) = setup();

        repo.upsert_on_message(&client_id, "5511988887777", "João", "João Ltda", true, None)
            .unwrap();
        let s = repo
            .upsert_on_message(&client_id, "5511988887777", "", "", false, None)
            .unwrap();

        assert_eq!(s.push_name, "João");
        assert_eq!(s.verified_name, "João Ltda");
        assert!(s.is_business);
    }
}
