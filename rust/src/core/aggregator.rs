//! Chat list assembly.
//!
//! Pure queries over the storage traits; no actor state. Each list is built
//! completely and returned as one value, so callers never commit a partial
//! render. A peer or group that vanishes mid-build is skipped.

use shepherd_storage_traits::{
    ConversationKey, MembershipError, MembershipIndex, MessageError, MessageStorage, Viewer,
};

use crate::state::{relative_age, DirectChatSummary, GroupChatSummary};

/// The viewer's one-to-one chat list: every peer in the viewer's church,
/// newest conversation first, peers without messages last.
pub(super) fn direct_chat_list(
    store: &dyn MessageStorage,
    membership: &dyn MembershipIndex,
    viewer: &Viewer,
    open_key: Option<&ConversationKey>,
    now: i64,
) -> anyhow::Result<Vec<DirectChatSummary>> {
    let peers = membership.church_peers(&viewer.church_id, &viewer.user_id)?;

    let mut list: Vec<DirectChatSummary> = Vec::with_capacity(peers.len());
    for peer in peers {
        let key = ConversationKey::direct(&viewer.user_id, &peer.id);
        let preview = match store.last_message(&key) {
            Ok(p) => p,
            Err(MessageError::NotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        let unread_count = if open_key == Some(&key) {
            0
        } else {
            store.unread_count(&key, &viewer.user_id)?
        };
        list.push(DirectChatSummary {
            peer_id: peer.id,
            peer_name: peer.name,
            peer_avatar_url: peer.avatar_url,
            last_message: preview.as_ref().map(|p| p.body.clone()),
            last_message_at: preview.as_ref().map(|p| p.created_at),
            last_message_age: preview.as_ref().map(|p| relative_age(now, p.created_at)),
            unread_count,
        });
    }

    // Newest first; peers with no conversation yet sort last, then by name.
    list.sort_by(|a, b| {
        b.last_message_at
            .unwrap_or(0)
            .cmp(&a.last_message_at.unwrap_or(0))
            .then_with(|| a.peer_name.cmp(&b.peer_name))
    });
    Ok(list)
}

/// The viewer's group chat list, same sort as the direct list.
pub(super) fn group_chat_list(
    store: &dyn MessageStorage,
    membership: &dyn MembershipIndex,
    viewer: &Viewer,
    open_key: Option<&ConversationKey>,
    avatar_limit: usize,
    now: i64,
) -> anyhow::Result<Vec<GroupChatSummary>> {
    let groups = membership.user_groups(&viewer.user_id)?;

    let mut list: Vec<GroupChatSummary> = Vec::with_capacity(groups.len());
    for group in groups {
        let member_count = match membership.group_member_count(&group.group_id) {
            Ok(n) => n,
            Err(MembershipError::NotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        let member_avatar_urls = match membership.group_member_avatars(&group.group_id, avatar_limit)
        {
            Ok(urls) => urls,
            Err(MembershipError::NotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        };

        let key = ConversationKey::group(&group.group_id);
        let preview = store.last_message(&key)?;
        let unread_count = if open_key == Some(&key) {
            0
        } else {
            store.unread_count(&key, &viewer.user_id)?
        };
        list.push(GroupChatSummary {
            group_id: group.group_id,
            name: group.name,
            image_url: group.image_url,
            member_count,
            member_avatar_urls,
            last_message: preview.as_ref().map(|p| p.body.clone()),
            last_message_at: preview.as_ref().map(|p| p.created_at),
            last_message_age: preview.as_ref().map(|p| relative_age(now, p.created_at)),
            unread_count,
        });
    }

    list.sort_by(|a, b| {
        b.last_message_at
            .unwrap_or(0)
            .cmp(&a.last_message_at.unwrap_or(0))
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(list)
}
