//! Implementation of MessageStorage trait for SQLite storage.

use rusqlite::{params, Connection, OptionalExtension};
use shepherd_storage_traits::{
    ConversationKey, DirectMessage, GroupMessage, MessageError, MessagePreview, MessageStorage,
    RowInsert,
};
use uuid::Uuid;

use crate::{db, ShepherdSqliteStorage};

#[inline]
fn into_message_err<T>(e: T) -> MessageError
where
    T: std::error::Error,
{
    MessageError::DatabaseError(e.to_string())
}

fn validate_body(body: &str) -> Result<(), MessageError> {
    if body.trim().is_empty() {
        return Err(MessageError::InvalidParameters("empty body".to_string()));
    }
    Ok(())
}

/// Resolve a `since_id` cursor to the (created_at, rowid) position of the
/// row, `None` when the id is unknown.
fn cursor_position(
    conn: &Connection,
    table: &str,
    since_id: &str,
) -> Result<Option<(i64, i64)>, MessageError> {
    conn.query_row(
        &format!("SELECT created_at, rowid FROM {table} WHERE id = ?"),
        params![since_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .map_err(into_message_err)
}

impl MessageStorage for ShepherdSqliteStorage {
    fn append_direct(
        &self,
        sender_id: &str,
        receiver_id: &str,
        body: &str,
    ) -> Result<DirectMessage, MessageError> {
        validate_body(body)?;
        if sender_id == receiver_id {
            return Err(MessageError::InvalidParameters(
                "sender and receiver are the same user".to_string(),
            ));
        }

        let message = self.with_connection(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?)",
                    params![receiver_id],
                    |row| row.get(0),
                )
                .map_err(into_message_err)?;
            if !exists {
                return Err(MessageError::NotFound(format!("user {receiver_id}")));
            }

            let created_at = Self::next_timestamp(conn).map_err(into_message_err)?;
            let message = DirectMessage {
                id: Uuid::new_v4().to_string(),
                sender_id: sender_id.to_string(),
                receiver_id: receiver_id.to_string(),
                body: body.to_string(),
                created_at,
                is_read: false,
            };
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, body, created_at, is_read)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    message.id,
                    message.sender_id,
                    message.receiver_id,
                    message.body,
                    message.created_at,
                    message.is_read,
                ],
            )
            .map_err(into_message_err)?;
            Ok(message)
        })?;

        self.notify(RowInsert::Direct(message.clone()));
        Ok(message)
    }

    fn append_group(
        &self,
        group_id: &str,
        sender_id: &str,
        body: &str,
    ) -> Result<GroupMessage, MessageError> {
        validate_body(body)?;

        let message = self.with_connection(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM groups WHERE id = ?)",
                    params![group_id],
                    |row| row.get(0),
                )
                .map_err(into_message_err)?;
            if !exists {
                return Err(MessageError::NotFound(format!("group {group_id}")));
            }

            let is_member: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ?)",
                    params![group_id, sender_id],
                    |row| row.get(0),
                )
                .map_err(into_message_err)?;
            if !is_member {
                return Err(MessageError::NotGroupMember);
            }

            let created_at = Self::next_timestamp(conn).map_err(into_message_err)?;
            let message = GroupMessage {
                id: Uuid::new_v4().to_string(),
                group_id: group_id.to_string(),
                sender_id: sender_id.to_string(),
                body: body.to_string(),
                created_at,
                is_read: false,
            };
            conn.execute(
                "INSERT INTO group_messages (id, group_id, sender_id, body, created_at, is_read)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    message.id,
                    message.group_id,
                    message.sender_id,
                    message.body,
                    message.created_at,
                    message.is_read,
                ],
            )
            .map_err(into_message_err)?;
            Ok(message)
        })?;

        self.notify(RowInsert::Group(message.clone()));
        Ok(message)
    }

    fn direct_thread(
        &self,
        user_a: &str,
        user_b: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<DirectMessage>, MessageError> {
        self.with_connection(|conn| {
            let cursor = match since_id {
                Some(id) => cursor_position(conn, "messages", id)?,
                None => None,
            };
            let (since_ts, since_rowid) = cursor.unwrap_or((i64::MIN, i64::MIN));

            let mut stmt = conn
                .prepare(
                    "SELECT id, sender_id, receiver_id, body, created_at, is_read
                     FROM messages
                     WHERE ((sender_id = ?1 AND receiver_id = ?2)
                         OR (sender_id = ?2 AND receiver_id = ?1))
                       AND (created_at > ?3 OR (created_at = ?3 AND rowid > ?4))
                     ORDER BY created_at ASC, rowid ASC",
                )
                .map_err(into_message_err)?;
            let rows = stmt
                .query_map(
                    params![user_a, user_b, since_ts, since_rowid],
                    db::row_to_direct_message,
                )
                .map_err(into_message_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(into_message_err)
        })
    }

    fn group_thread(
        &self,
        group_id: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<GroupMessage>, MessageError> {
        self.with_connection(|conn| {
            let cursor = match since_id {
                Some(id) => cursor_position(conn, "group_messages", id)?,
                None => None,
            };
            let (since_ts, since_rowid) = cursor.unwrap_or((i64::MIN, i64::MIN));

            let mut stmt = conn
                .prepare(
                    "SELECT id, group_id, sender_id, body, created_at, is_read
                     FROM group_messages
                     WHERE group_id = ?1
                       AND (created_at > ?2 OR (created_at = ?2 AND rowid > ?3))
                     ORDER BY created_at ASC, rowid ASC",
                )
                .map_err(into_message_err)?;
            let rows = stmt
                .query_map(
                    params![group_id, since_ts, since_rowid],
                    db::row_to_group_message,
                )
                .map_err(into_message_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(into_message_err)
        })
    }

    fn last_message(&self, key: &ConversationKey) -> Result<Option<MessagePreview>, MessageError> {
        self.with_connection(|conn| {
            let row = match key {
                ConversationKey::Direct { a, b } => conn
                    .query_row(
                        "SELECT body, created_at FROM messages
                         WHERE (sender_id = ?1 AND receiver_id = ?2)
                            OR (sender_id = ?2 AND receiver_id = ?1)
                         ORDER BY created_at DESC, rowid DESC
                         LIMIT 1",
                        params![a, b],
                        |row| {
                            Ok(MessagePreview {
                                body: row.get(0)?,
                                created_at: row.get(1)?,
                            })
                        },
                    )
                    .optional(),
                ConversationKey::Group { group_id } => conn
                    .query_row(
                        "SELECT body, created_at FROM group_messages
                         WHERE group_id = ?
                         ORDER BY created_at DESC, rowid DESC
                         LIMIT 1",
                        params![group_id],
                        |row| {
                            Ok(MessagePreview {
                                body: row.get(0)?,
                                created_at: row.get(1)?,
                            })
                        },
                    )
                    .optional(),
            };
            row.map_err(into_message_err)
        })
    }

    fn unread_count(&self, key: &ConversationKey, viewer_id: &str) -> Result<u32, MessageError> {
        self.with_connection(|conn| {
            let count: i64 = match key {
                ConversationKey::Direct { .. } => {
                    let Some(peer) = key.peer_of(viewer_id) else {
                        return Ok(0);
                    };
                    conn.query_row(
                        "SELECT COUNT(*) FROM messages
                         WHERE sender_id = ? AND receiver_id = ? AND is_read = 0",
                        params![peer, viewer_id],
                        |row| row.get(0),
                    )
                    .map_err(into_message_err)?
                }
                ConversationKey::Group { group_id } => conn
                    .query_row(
                        "SELECT COUNT(*) FROM group_messages
                         WHERE group_id = ? AND sender_id != ? AND is_read = 0",
                        params![group_id, viewer_id],
                        |row| row.get(0),
                    )
                    .map_err(into_message_err)?,
            };
            Ok(count as u32)
        })
    }

    fn mark_read(&self, key: &ConversationKey, viewer_id: &str) -> Result<(), MessageError> {
        self.with_connection(|conn| {
            match key {
                ConversationKey::Direct { .. } => {
                    let Some(peer) = key.peer_of(viewer_id) else {
                        return Ok(());
                    };
                    conn.execute(
                        "UPDATE messages SET is_read = 1
                         WHERE sender_id = ? AND receiver_id = ?",
                        params![peer, viewer_id],
                    )
                    .map_err(into_message_err)?;
                }
                ConversationKey::Group { group_id } => {
                    conn.execute(
                        "UPDATE group_messages SET is_read = 1
                         WHERE group_id = ? AND sender_id != ?",
                        params![group_id, viewer_id],
                    )
                    .map_err(into_message_err)?;
                }
            }
            Ok(())
        })
    }
}
