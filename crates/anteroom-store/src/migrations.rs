use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            role        TEXT NOT NULL DEFAULT 'member',
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS application_requests (
            user_id             TEXT PRIMARY KEY REFERENCES users(id),
            status              TEXT NOT NULL,
            rejection_reason    TEXT,
            created_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_requests_status
            ON application_requests(status, created_at);

        CREATE TABLE IF NOT EXISTS access_audit (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT NOT NULL REFERENCES users(id),
            reason      TEXT NOT NULL,
            accessed_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_user
            ON access_audit(user_id, accessed_at);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            receiver_id     TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            attachment_url  TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
