use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use rencontre_shared::{ConnId, SessionId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::EphemeralMessage;

impl Database {
    pub fn insert_message(&self, message: &EphemeralMessage) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages
                 (id, session_id, sender_conn, sender_identity, content, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                message.session_id.map(|s| s.to_string()),
                message.sender_conn.to_string(),
                message.sender_identity.as_ref().map(|u| u.as_str()),
                message.content,
                message.created_at.to_rfc3339(),
                message.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_messages_for_session(
        &self,
        session_id: SessionId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<EphemeralMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, session_id, sender_conn, sender_identity, content, created_at, expires_at
             FROM messages
             WHERE session_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(
            params![session_id.to_string(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Delete every message whose retention window elapsed at or before
    /// `now`. Returns the number of rows removed.
    ///
    /// This is the expiry sweeper's only primitive. It is a plain range
    /// delete, so overlapping or repeated sweeps are harmless.
    pub fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE expires_at <= ?1",
            params![now.to_rfc3339()],
        )?;
        Ok(affected)
    }

    /// Total number of stored messages (observability and tests).
    pub fn count_messages(&self) -> Result<u64> {
        let count: u64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<EphemeralMessage> {
    let id_str: String = row.get(0)?;
    let session_id_str: Option<String> = row.get(1)?;
    let sender_conn_str: String = row.get(2)?;
    let sender_identity: Option<String> = row.get(3)?;
    let content: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    let expires_str: String = row.get(6)?;

    let id = parse_uuid(&id_str, 0)?;

    let session_id = match session_id_str {
        Some(s) => Some(SessionId(parse_uuid(&s, 1)?)),
        None => None,
    };

    let sender_conn = ConnId(parse_uuid(&sender_conn_str, 2)?);

    let created_at = parse_timestamp(&created_str, 5)?;
    let expires_at = parse_timestamp(&expires_str, 6)?;

    Ok(EphemeralMessage {
        id,
        session_id,
        sender_conn,
        sender_identity: sender_identity.map(UserId),
        content,
        created_at,
        expires_at,
    })
}

fn parse_uuid(s: &str, column: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_timestamp(s: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
