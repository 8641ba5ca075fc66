//! Instance repository: gateway connections and their bearer tokens

use chrono::{DateTime, Utc};
use secrecy::SecretString;

use super::DbPool;
use crate::{Error, Result};

/// Connection status of a gateway instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Pending,
    Connected,
    Disconnected,
    QrPending,
}

impl InstanceStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::QrPending => "qr_pending",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "connected" => Some(Self::Connected),
            "disconnected" => Some(Self::Disconnected),
            "qr_pending" => Some(Self::QrPending),
            _ => None,
        }
    }
}

/// A gateway connection belonging to exactly one client
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: String,
    pub client_id: String,
    /// Bearer token for the gateway decrypt/download API
    pub token: SecretString,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Instance repository
#[derive(Clone)]
pub struct InstanceRepo {
    pool: DbPool,
}

impl InstanceRepo {
    /// Create a new instance repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Register an instance for a client
    ///
    /// The instance id comes from the gateway at provisioning time, so it
    /// is supplied rather than generated.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self, id: &str, client_id: &str, token: &str) -> Result<Instance> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO instances (id, client_id, token, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
            [id, client_id, token, &now],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Instance {
            id: id.to_string(),
            client_id: client_id.to_string(),
            token: SecretString::from(token),
            status: InstanceStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    /// Fetch an instance by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: &str) -> Result<Option<Instance>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let instance = conn
            .query_row(
                "SELECT id, client_id, token, status, created_at, updated_at
                 FROM instances WHERE id = ?1",
                [id],
                |row| {
                    Ok(Instance {
                        id: row.get(0)?,
                        client_id: row.get(1)?,
                        token: SecretString::from(row.get::<_, String>(2)?),
                        status: InstanceStatus::from_str(&row.get::<_, String>(3)?)
                            .unwrap_or(InstanceStatus::Pending),
                        created_at: parse_datetime(&row.get::<_, String>(4)?),
                        updated_at: parse_datetime(&row.get::<_, String>(5)?),
                    })
                },
            )
            .ok();

        Ok(instance)
    }

    /// Update connection status from a gateway callback
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set_status(&self, id: &str, status: InstanceStatus) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let updated = conn
            .execute(
                "UPDATE instances SET status = ?1, updated_at = ?2 WHERE id = ?3",
                [status.as_str(), &Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        if updated == 0 {
            return Err(Error::InstanceNotFound(id.to_string()));
        }
        Ok(())
    }
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
