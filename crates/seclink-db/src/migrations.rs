use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL CHECK (role IN ('volunteer', 'ngo', 'admin')),
                ref_id      TEXT,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );

            CREATE INDEX idx_users_ref ON users(ref_id);

            CREATE TABLE volunteers (
                id                   TEXT PRIMARY KEY,
                full_name            TEXT NOT NULL,
                weekly_availability  INTEGER NOT NULL,
                areas_of_expertise   TEXT NOT NULL DEFAULT '[]',
                resume_url           TEXT,
                background_check     INTEGER NOT NULL DEFAULT 0,
                created_at           INTEGER NOT NULL,
                updated_at           INTEGER NOT NULL
            );

            CREATE TABLE ngos (
                id                 TEXT PRIMARY KEY,
                organization_name  TEXT NOT NULL,
                areas_of_concern   TEXT NOT NULL DEFAULT '[]',
                created_at         INTEGER NOT NULL,
                updated_at         INTEGER NOT NULL
            );

            -- No foreign keys on participants: messages outlive deleted users.
            CREATE TABLE messages (
                seq              INTEGER PRIMARY KEY AUTOINCREMENT,
                id               TEXT NOT NULL UNIQUE,
                conversation_id  TEXT NOT NULL,
                sender_id        TEXT NOT NULL,
                recipient_id     TEXT NOT NULL,
                content          TEXT NOT NULL,
                created_at       INTEGER NOT NULL,
                is_read          INTEGER NOT NULL DEFAULT 0,
                read_at          INTEGER
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at, seq);

            CREATE INDEX idx_messages_unread
                ON messages(recipient_id, is_read);

            CREATE INDEX idx_messages_sender
                ON messages(sender_id);

            INSERT INTO schema_version (version) VALUES (1);
            "
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rerun_is_noop() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
