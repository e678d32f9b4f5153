use crate::Database;
use crate::models::{MessageRow, RequestRow, UserRow};
use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, role, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, username, role, Utc::now().to_rfc3339()),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn list_users_by_role(&self, role: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, role, created_at FROM users
                 WHERE role = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt
                .query_map([role], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Application requests --

    pub fn submit_request(&self, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO application_requests (user_id, status, created_at)
                 VALUES (?1, 'pending', ?2)",
                (user_id, Utc::now().to_rfc3339()),
            )?;
            Ok(())
        })
    }

    /// Admin-side decision. A rejection reason, when given, is also written
    /// to the audit trail so the portal can resolve it later.
    pub fn set_request_status(
        &self,
        user_id: &str,
        status: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE application_requests SET status = ?2, rejection_reason = ?3
                 WHERE user_id = ?1",
                rusqlite::params![user_id, status, reason],
            )?;
            if let Some(reason) = reason {
                record_access_reason(conn, user_id, reason)?;
            }
            Ok(())
        })
    }

    pub fn get_request_by_user(&self, user_id: &str) -> Result<Option<RequestRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, status, rejection_reason, created_at
                 FROM application_requests WHERE user_id = ?1",
            )?;
            let row = stmt.query_row([user_id], request_from_row).optional()?;
            Ok(row)
        })
    }

    pub fn list_requests_with_status(&self, statuses: &[&str]) -> Result<Vec<RequestRow>> {
        if statuses.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=statuses.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT user_id, status, rejection_reason, created_at
                 FROM application_requests WHERE status IN ({})
                 ORDER BY created_at, user_id",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = statuses
                .iter()
                .map(|s| s as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), request_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Audit trail --

    pub fn record_access_reason(&self, user_id: &str, reason: &str) -> Result<()> {
        self.with_conn(|conn| record_access_reason(conn, user_id, reason))
    }

    pub fn latest_access_reason(&self, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT reason FROM access_audit WHERE user_id = ?1
                     ORDER BY accessed_at DESC, id DESC LIMIT 1",
                    [user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        attachment_url: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, attachment_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, sender_id, receiver_id, content, attachment_url, created_at],
            )?;
            Ok(())
        })
    }

    /// All messages between the pair, either direction, oldest first.
    pub fn list_messages_between(&self, user_a: &str, user_b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, content, attachment_url, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at, id",
            )?;
            let rows = stmt
                .query_map([user_a, user_b], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        receiver_id: row.get(2)?,
                        content: row.get(3)?,
                        attachment_url: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn record_access_reason(conn: &Connection, user_id: &str, reason: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO access_audit (user_id, reason, accessed_at) VALUES (?1, ?2, ?3)",
        (user_id, reason, Utc::now().to_rfc3339()),
    )?;
    Ok(())
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is a compile-time constant at every call site.
    let sql = format!(
        "SELECT id, username, role, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([value], user_from_row).optional()?;
    Ok(row)
}

fn user_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        role: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn request_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<RequestRow, rusqlite::Error> {
    Ok(RequestRow {
        user_id: row.get(0)?,
        status: row.get(1)?,
        rejection_reason: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
