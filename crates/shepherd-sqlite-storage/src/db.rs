//! Row mappers shared by the storage trait implementations.

use rusqlite::{Result as SqliteResult, Row};
use shepherd_storage_traits::{DirectMessage, GroupMessage, GroupOverview, PeerProfile};

pub(crate) fn row_to_direct_message(row: &Row) -> SqliteResult<DirectMessage> {
    Ok(DirectMessage {
        id: row.get("id")?,
        sender_id: row.get("sender_id")?,
        receiver_id: row.get("receiver_id")?,
        body: row.get("body")?,
        created_at: row.get("created_at")?,
        is_read: row.get("is_read")?,
    })
}

pub(crate) fn row_to_group_message(row: &Row) -> SqliteResult<GroupMessage> {
    Ok(GroupMessage {
        id: row.get("id")?,
        group_id: row.get("group_id")?,
        sender_id: row.get("sender_id")?,
        body: row.get("body")?,
        created_at: row.get("created_at")?,
        is_read: row.get("is_read")?,
    })
}

pub(crate) fn row_to_peer_profile(row: &Row) -> SqliteResult<PeerProfile> {
    Ok(PeerProfile {
        id: row.get("id")?,
        name: row.get("name")?,
        avatar_url: row.get("avatar_url")?,
    })
}

pub(crate) fn row_to_group_overview(row: &Row) -> SqliteResult<GroupOverview> {
    Ok(GroupOverview {
        group_id: row.get("id")?,
        name: row.get("name")?,
        image_url: row.get("image_url")?,
    })
}
