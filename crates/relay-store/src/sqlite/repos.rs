//! Stateless repositories — every method takes `&Connection` and executes
//! SQL. No shared mutable state; concurrency control is the pool's job.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use relay_core::{ChatId, MessageContent, MessageKind, StoredMessage, UserId};

use crate::errors::{Result, StoreError};

/// Message log operations.
pub struct MessageRepo;

impl MessageRepo {
    /// Insert one message. The kind-specific content is stored as the JSON
    /// shape clients receive.
    pub fn insert(conn: &Connection, message: &StoredMessage) -> Result<()> {
        let content = serde_json::to_string(&message.content)?;
        let _ = conn.execute(
            "INSERT INTO messages (id, chat_id, sender_id, kind, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.as_str(),
                message.chat_id.as_str(),
                message.sender_id.as_str(),
                message.kind.as_str(),
                content,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List a chat's messages in creation order.
    pub fn list_by_chat(
        conn: &Connection,
        chat_id: &ChatId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, sender_id, kind, content, created_at
             FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at ASC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(params![chat_id.as_str(), limit, offset], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, chat_id, sender_id, kind, content, created_at) = row?;
            messages.push(StoredMessage {
                id: id.into(),
                chat_id: chat_id.into(),
                sender_id: sender_id.into(),
                kind: parse_kind(&kind)?,
                content: serde_json::from_str::<MessageContent>(&content)?,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(messages)
    }

    /// Number of messages in a chat.
    pub fn count_by_chat(conn: &Connection, chat_id: &ChatId) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            [chat_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Chat membership operations.
pub struct MembershipRepo;

impl MembershipRepo {
    /// User IDs that are members of a chat, in join order.
    pub fn members(conn: &Connection, chat_id: &ChatId) -> Result<Vec<UserId>> {
        let mut stmt = conn.prepare(
            "SELECT user_id FROM chat_members WHERE chat_id = ?1 ORDER BY joined_at ASC",
        )?;
        let rows = stmt.query_map([chat_id.as_str()], |row| row.get::<_, String>(0))?;

        let mut members = Vec::new();
        for row in rows {
            members.push(UserId::from(row?));
        }
        Ok(members)
    }

    /// Add a user to a chat. Adding an existing member is a no-op.
    pub fn add_member(conn: &Connection, chat_id: &ChatId, user_id: &UserId) -> Result<()> {
        let _ = conn.execute(
            "INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
            params![chat_id.as_str(), user_id.as_str()],
        )?;
        Ok(())
    }

    /// Remove a user from a chat. Removing a non-member is a no-op.
    pub fn remove_member(conn: &Connection, chat_id: &ChatId, user_id: &UserId) -> Result<()> {
        let _ = conn.execute(
            "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.as_str(), user_id.as_str()],
        )?;
        Ok(())
    }
}

fn parse_kind(kind: &str) -> Result<MessageKind> {
    match kind {
        "text" => Ok(MessageKind::Text),
        "code" => Ok(MessageKind::Code),
        "file" => Ok(MessageKind::File),
        other => Err(StoreError::Internal(format!("unknown message kind: {other}"))),
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Internal(format!("bad timestamp {value:?}: {e}")))
}
