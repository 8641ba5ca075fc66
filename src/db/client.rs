//! Client (tenant) repository

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// A tenant owning one or more gateway instances
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Client repository
#[derive(Clone)]
pub struct ClientRepo {
    pool: DbPool,
}

impl ClientRepo {
    /// Create a new client repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a tenant
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self, name: &str) -> Result<Client> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO clients (id, name, status, created_at) VALUES (?1, ?2, 'active', ?3)",
            [&id, name, &now],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Client {
            id,
            name: name.to_string(),
            status: "active".to_string(),
            created_at: Utc::now(),
        })
    }

    /// Fetch a tenant by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: &str) -> Result<Option<Client>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let client = conn
            .query_row(
                "SELECT id, name, status, created_at FROM clients WHERE id = ?1",
                [id],
                |row| {
                    Ok(Client {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        status: row.get(2)?,
                        created_at: super::instance::parse_datetime(&row.get::<_, String>(3)?),
                    })
                },
            )
            .ok();

        Ok(client)
    }
}
