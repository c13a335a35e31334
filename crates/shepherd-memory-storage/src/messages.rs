//! [`MessageStorage`] over the in-memory tables.

use shepherd_storage_traits::{
    ConversationKey, DirectMessage, GroupMessage, MessageError, MessagePreview, MessageStorage,
    RowInsert,
};
use uuid::Uuid;

use crate::ShepherdMemoryStorage;

fn validate_body(body: &str) -> Result<(), MessageError> {
    if body.trim().is_empty() {
        return Err(MessageError::InvalidParameters("empty body".to_string()));
    }
    Ok(())
}

impl MessageStorage for ShepherdMemoryStorage {
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
        if self.writes_failing() {
            return Err(MessageError::DatabaseError("writes disabled".to_string()));
        }

        let message = {
            let mut inner = self.inner.write();
            if !inner.users.contains_key(receiver_id) {
                return Err(MessageError::NotFound(format!("user {receiver_id}")));
            }
            let created_at = Self::next_timestamp(&mut inner);
            let message = DirectMessage {
                id: Uuid::new_v4().to_string(),
                sender_id: sender_id.to_string(),
                receiver_id: receiver_id.to_string(),
                body: body.to_string(),
                created_at,
                is_read: false,
            };
            inner.direct.push(message.clone());
            message
        };
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
        if self.writes_failing() {
            return Err(MessageError::DatabaseError("writes disabled".to_string()));
        }

        let message = {
            let mut inner = self.inner.write();
            if !inner.groups.contains_key(group_id) {
                return Err(MessageError::NotFound(format!("group {group_id}")));
            }
            let is_member = inner
                .group_members
                .get(group_id)
                .is_some_and(|members| members.iter().any(|(id, _)| id == sender_id));
            if !is_member {
                return Err(MessageError::NotGroupMember);
            }
            let created_at = Self::next_timestamp(&mut inner);
            let message = GroupMessage {
                id: Uuid::new_v4().to_string(),
                group_id: group_id.to_string(),
                sender_id: sender_id.to_string(),
                body: body.to_string(),
                created_at,
                is_read: false,
            };
            inner.group_msgs.push(message.clone());
            message
        };
        self.notify(RowInsert::Group(message.clone()));
        Ok(message)
    }

    fn direct_thread(
        &self,
        user_a: &str,
        user_b: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<DirectMessage>, MessageError> {
        let inner = self.inner.read();
        let mut rows: Vec<DirectMessage> = inner
            .direct
            .iter()
            .filter(|m| {
                (m.sender_id == user_a && m.receiver_id == user_b)
                    || (m.sender_id == user_b && m.receiver_id == user_a)
            })
            .cloned()
            .collect();
        if let Some(since) = since_id {
            if let Some(pos) = rows.iter().position(|m| m.id == since) {
                rows.drain(..=pos);
            }
            // Unknown cursor: return the full thread.
        }
        Ok(rows)
    }

    fn group_thread(
        &self,
        group_id: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<GroupMessage>, MessageError> {
        let inner = self.inner.read();
        let mut rows: Vec<GroupMessage> = inner
            .group_msgs
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect();
        if let Some(since) = since_id {
            if let Some(pos) = rows.iter().position(|m| m.id == since) {
                rows.drain(..=pos);
            }
        }
        Ok(rows)
    }

    fn last_message(&self, key: &ConversationKey) -> Result<Option<MessagePreview>, MessageError> {
        let inner = self.inner.read();
        // Appends keep each table ascending, so the last match is newest.
        let preview = match key {
            ConversationKey::Direct { a, b } => inner
                .direct
                .iter()
                .rev()
                .find(|m| {
                    (m.sender_id == *a && m.receiver_id == *b)
                        || (m.sender_id == *b && m.receiver_id == *a)
                })
                .map(|m| MessagePreview {
                    body: m.body.clone(),
                    created_at: m.created_at,
                }),
            ConversationKey::Group { group_id } => inner
                .group_msgs
                .iter()
                .rev()
                .find(|m| m.group_id == *group_id)
                .map(|m| MessagePreview {
                    body: m.body.clone(),
                    created_at: m.created_at,
                }),
        };
        Ok(preview)
    }

    fn unread_count(&self, key: &ConversationKey, viewer_id: &str) -> Result<u32, MessageError> {
        let inner = self.inner.read();
        let count = match key {
            ConversationKey::Direct { .. } => {
                let Some(peer) = key.peer_of(viewer_id) else {
                    return Ok(0);
                };
                inner
                    .direct
                    .iter()
                    .filter(|m| {
                        m.sender_id == peer && m.receiver_id == viewer_id && !m.is_read
                    })
                    .count()
            }
            ConversationKey::Group { group_id } => inner
                .group_msgs
                .iter()
                .filter(|m| m.group_id == *group_id && m.sender_id != viewer_id && !m.is_read)
                .count(),
        };
        Ok(count as u32)
    }

    fn mark_read(&self, key: &ConversationKey, viewer_id: &str) -> Result<(), MessageError> {
        let mut inner = self.inner.write();
        match key {
            ConversationKey::Direct { .. } => {
                let Some(peer) = key.peer_of(viewer_id) else {
                    return Ok(());
                };
                let peer = peer.to_string();
                for m in inner
                    .direct
                    .iter_mut()
                    .filter(|m| m.sender_id == peer && m.receiver_id == viewer_id)
                {
                    m.is_read = true;
                }
            }
            ConversationKey::Group { group_id } => {
                for m in inner
                    .group_msgs
                    .iter_mut()
                    .filter(|m| m.group_id == *group_id && m.sender_id != viewer_id)
                {
                    m.is_read = true;
                }
            }
        }
        Ok(())
    }
}
