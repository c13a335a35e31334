//! Message rows and the message storage trait.
//!
//! Messages are append-only. Two tables back the two messaging spaces: direct
//! messages keyed by an unordered user-id pair and group messages keyed by a
//! group id. The storage assigns ids and server timestamps; the core never
//! fabricates either (its optimistic temp rows are replaced on confirmation).

use serde::{Deserialize, Serialize};

use crate::error::MessageError;
use crate::key::ConversationKey;

/// A one-to-one message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    /// Server-assigned id.
    pub id: String,
    /// Author.
    pub sender_id: String,
    /// Addressee. Never equal to `sender_id`.
    pub receiver_id: String,
    /// Message text.
    pub body: String,
    /// Server timestamp, unix seconds.
    pub created_at: i64,
    /// Set true only by the receiver's mark-read action.
    pub is_read: bool,
}

/// A group message row.
///
/// `is_read` is a single flag shared by all recipients, mirroring the wire
/// format this store models; per-recipient read state is a pending product
/// decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    /// Server-assigned id.
    pub id: String,
    /// Group the message belongs to.
    pub group_id: String,
    /// Author; a member of the group at send time.
    pub sender_id: String,
    /// Message text.
    pub body: String,
    /// Server timestamp, unix seconds.
    pub created_at: i64,
    /// Shared read flag.
    pub is_read: bool,
}

/// Last-message preview for a conversation list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePreview {
    /// Message text.
    pub body: String,
    /// Server timestamp, unix seconds.
    pub created_at: i64,
}

/// A freshly appended row, as delivered to a [`crate::RealtimeSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowInsert {
    /// Insert into the direct messages table.
    Direct(DirectMessage),
    /// Insert into the group messages table.
    Group(GroupMessage),
}

impl RowInsert {
    /// The conversation the row belongs to.
    pub fn conversation_key(&self) -> ConversationKey {
        match self {
            Self::Direct(m) => ConversationKey::direct(&m.sender_id, &m.receiver_id),
            Self::Group(m) => ConversationKey::group(&m.group_id),
        }
    }

    /// Server-assigned row id.
    pub fn id(&self) -> &str {
        match self {
            Self::Direct(m) => &m.id,
            Self::Group(m) => &m.id,
        }
    }
}

/// Durable, append-only message store.
///
/// Contracts every backend must uphold:
/// - Appends assign a unique id and a server timestamp; timestamps never go
///   backwards within one backend instance.
/// - Thread reads return rows ascending by `created_at` (insertion order on
///   ties) and are prefix-stable: re-reading with the same arguments returns
///   the previous result as a prefix.
/// - `mark_read` is idempotent; concurrent calls from multiple devices of
///   the same viewer all succeed.
/// - Successful appends are forwarded to the attached sink, if any.
pub trait MessageStorage: Send + Sync {
    /// Append a one-to-one message.
    ///
    /// Fails with [`MessageError::InvalidParameters`] on an empty body or
    /// `sender_id == receiver_id`.
    fn append_direct(
        &self,
        sender_id: &str,
        receiver_id: &str,
        body: &str,
    ) -> Result<DirectMessage, MessageError>;

    /// Append a group message.
    ///
    /// Fails with [`MessageError::NotGroupMember`] if the sender does not
    /// belong to the group (store-side enforcement).
    fn append_group(
        &self,
        group_id: &str,
        sender_id: &str,
        body: &str,
    ) -> Result<GroupMessage, MessageError>;

    /// The ordered thread between two users, both directions.
    ///
    /// `since_id` restarts the read after a known row id; an unknown id
    /// yields the full thread.
    fn direct_thread(
        &self,
        user_a: &str,
        user_b: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<DirectMessage>, MessageError>;

    /// The ordered thread of a group. Same cursor contract as
    /// [`MessageStorage::direct_thread`].
    fn group_thread(
        &self,
        group_id: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<GroupMessage>, MessageError>;

    /// Newest message of a conversation, if any.
    fn last_message(&self, key: &ConversationKey) -> Result<Option<MessagePreview>, MessageError>;

    /// Unread count for `viewer_id` in the conversation: direct messages
    /// addressed to the viewer by the peer and not read, or group messages
    /// not sent by the viewer and not read.
    fn unread_count(&self, key: &ConversationKey, viewer_id: &str) -> Result<u32, MessageError>;

    /// Mark everything counted by [`MessageStorage::unread_count`] as read.
    /// Idempotent.
    fn mark_read(&self, key: &ConversationKey, viewer_id: &str) -> Result<(), MessageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_insert_conversation_key() {
        let row = RowInsert::Direct(DirectMessage {
            id: "m1".into(),
            sender_id: "u2".into(),
            receiver_id: "u1".into(),
            body: "hi".into(),
            created_at: 10,
            is_read: false,
        });
        assert_eq!(row.conversation_key(), ConversationKey::direct("u1", "u2"));
        assert_eq!(row.id(), "m1");

        let row = RowInsert::Group(GroupMessage {
            id: "m2".into(),
            group_id: "g1".into(),
            sender_id: "u1".into(),
            body: "hi team".into(),
            created_at: 11,
            is_read: false,
        });
        assert_eq!(row.conversation_key(), ConversationKey::group("g1"));
    }
}
