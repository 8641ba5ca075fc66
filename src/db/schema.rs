//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Tenants
        CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Gateway connections, one or more per client
        CREATE TABLE IF NOT EXISTS instances (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id),
            token TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending', 'connected', 'disconnected', 'qr_pending')),
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_instances_client ON instances(client_id);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated to schema v1 (tenants)");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Chats, created lazily on first message
        CREATE TABLE IF NOT EXISTS chats (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id),
            chat_id TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            photo_url TEXT,
            is_group INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            last_message_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(client_id, chat_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chats_client ON chats(client_id);
        CREATE INDEX IF NOT EXISTS idx_chats_last_message ON chats(last_message_at);

        -- Senders, upserted on every message
        CREATE TABLE IF NOT EXISTS senders (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id),
            sender_id TEXT NOT NULL,
            push_name TEXT NOT NULL DEFAULT '',
            verified_name TEXT NOT NULL DEFAULT '',
            is_business INTEGER NOT NULL DEFAULT 0,
            photo_url TEXT,
            message_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(client_id, sender_id)
        );

        CREATE INDEX IF NOT EXISTS idx_senders_client ON senders(client_id);

        -- Messages; upstream message_id is globally unique and is the sole
        -- concurrency safeguard against duplicate webhook delivery
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id),
            chat_row_id TEXT NOT NULL REFERENCES chats(id),
            sender_row_id TEXT REFERENCES senders(id),
            message_id TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL CHECK(kind IN (
                'text', 'image', 'video', 'audio', 'document',
                'sticker', 'location', 'poll', 'unknown')),
            content TEXT NOT NULL DEFAULT '',
            from_me INTEGER NOT NULL DEFAULT 0,
            timestamp TEXT NOT NULL,
            location_json TEXT,
            poll_json TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_row_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_messages_client ON messages(client_id);

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::info!("migrated to schema v2 (chats, senders, messages)");
    Ok(())
}

fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- One row per detected media attachment; at most one per
        -- (upstream message id, media type)
        CREATE TABLE IF NOT EXISTS media_references (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL,
            -- Tenant coordinates captured at ingest time, so sweeps can
            -- rebuild storage paths and look up credentials without joins
            client_id TEXT NOT NULL REFERENCES clients(id),
            instance_id TEXT NOT NULL DEFAULT '',
            chat_id TEXT NOT NULL DEFAULT '',
            media_type TEXT NOT NULL CHECK(media_type IN (
                'image', 'video', 'audio', 'document', 'sticker')),
            mimetype TEXT NOT NULL DEFAULT '',
            declared_length INTEGER,
            caption TEXT NOT NULL DEFAULT '',
            media_key TEXT NOT NULL DEFAULT '',
            direct_path TEXT NOT NULL DEFAULT '',
            file_sha256 TEXT NOT NULL DEFAULT '',
            file_enc_sha256 TEXT NOT NULL DEFAULT '',
            fallback_url TEXT,
            file_name TEXT,
            extra_json TEXT NOT NULL DEFAULT '{}',
            file_path TEXT,
            download_status TEXT NOT NULL DEFAULT 'pending'
                CHECK(download_status IN (
                    'pending', 'success', 'failed',
                    'invalid_data', 'corrupted', 'expired')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(message_id, media_type)
        );

        CREATE INDEX IF NOT EXISTS idx_media_status ON media_references(download_status);
        CREATE INDEX IF NOT EXISTS idx_media_message ON media_references(message_id);

        PRAGMA user_version = 3;
        ",
    )?;

    tracing::info!("migrated to schema v3 (media references)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_init() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();

        // Verify tables exist
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
                 ('clients', 'instances', 'chats', 'senders', 'messages', 'media_references')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 6);
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap(); // Should not fail
    }

    #[test]
    fn test_message_id_unique() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();

        conn.execute("INSERT INTO clients (id, name) VALUES ('c1', 'Acme')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO chats (id, client_id, chat_id) VALUES ('ch1', 'c1', '5511999998888')",
            [],
        )
        .unwrap();

        let insert = "INSERT INTO messages (id, client_id, chat_row_id, message_id, kind, timestamp)
                      VALUES (?1, 'c1', 'ch1', 'ABC123', 'text', datetime('now'))";
        conn.execute(insert, ["m1"]).unwrap();
        assert!(conn.execute(insert, ["m2"]).is_err());
    }
}
