//! [`MembershipIndex`] over the in-memory tables.

use shepherd_storage_traits::{
    GroupOverview, MembershipError, MembershipIndex, PeerProfile,
};

use crate::ShepherdMemoryStorage;

impl MembershipIndex for ShepherdMemoryStorage {
    fn church_peers(
        &self,
        church_id: &str,
        exclude_user_id: &str,
    ) -> Result<Vec<PeerProfile>, MembershipError> {
        let inner = self.inner.read();
        if !inner.churches.contains_key(church_id) {
            return Err(MembershipError::NotFound(format!("church {church_id}")));
        }
        let mut peers: Vec<PeerProfile> = inner
            .users
            .values()
            .filter(|u| u.church_id == church_id && u.profile.id != exclude_user_id)
            .map(|u| u.profile.clone())
            .collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(peers)
    }

    fn peer_profile(&self, user_id: &str) -> Result<Option<PeerProfile>, MembershipError> {
        let inner = self.inner.read();
        Ok(inner.users.get(user_id).map(|u| u.profile.clone()))
    }

    fn user_groups(&self, user_id: &str) -> Result<Vec<GroupOverview>, MembershipError> {
        let inner = self.inner.read();
        let mut groups: Vec<GroupOverview> = inner
            .group_members
            .iter()
            .filter(|(_, members)| members.iter().any(|(id, _)| id == user_id))
            .filter_map(|(group_id, _)| inner.groups.get(group_id).cloned())
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.group_id.cmp(&b.group_id)));
        Ok(groups)
    }

    fn group_member_count(&self, group_id: &str) -> Result<u32, MembershipError> {
        let inner = self.inner.read();
        if !inner.groups.contains_key(group_id) {
            return Err(MembershipError::NotFound(format!("group {group_id}")));
        }
        let count = inner
            .group_members
            .get(group_id)
            .map(|members| members.len())
            .unwrap_or(0);
        Ok(count as u32)
    }

    fn group_member_avatars(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, MembershipError> {
        let inner = self.inner.read();
        if !inner.groups.contains_key(group_id) {
            return Err(MembershipError::NotFound(format!("group {group_id}")));
        }
        let avatars = inner
            .group_members
            .get(group_id)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|(id, _)| inner.users.get(id))
                    .filter_map(|u| u.profile.avatar_url.clone())
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default();
        Ok(avatars)
    }

    fn is_group_member(&self, group_id: &str, user_id: &str) -> Result<bool, MembershipError> {
        let inner = self.inner.read();
        Ok(inner
            .group_members
            .get(group_id)
            .is_some_and(|members| members.iter().any(|(id, _)| id == user_id)))
    }
}
