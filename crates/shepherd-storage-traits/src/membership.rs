//! Membership lookups consumed by the conversation aggregator.
//!
//! Church and group membership are owned by an external system; the core only
//! reads them. Backends may co-locate this data with the message tables (the
//! bundled memory and sqlite backends do) or proxy a remote service.

use serde::{Deserialize, Serialize};

use crate::error::MembershipError;

/// A user visible in the viewer's church, as shown in the direct chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerProfile {
    /// Stable user id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Avatar URL, if the user uploaded one.
    pub avatar_url: Option<String>,
}

/// A group the viewer belongs to, as shown in the group chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOverview {
    /// Stable group id.
    pub group_id: String,
    /// Group name.
    pub name: String,
    /// Group image URL, if set.
    pub image_url: Option<String>,
}

/// Read-only membership lookups.
pub trait MembershipIndex: Send + Sync {
    /// All users in `church_id` except `exclude_user_id`.
    fn church_peers(
        &self,
        church_id: &str,
        exclude_user_id: &str,
    ) -> Result<Vec<PeerProfile>, MembershipError>;

    /// Profile of a single user, `None` if the user no longer exists.
    fn peer_profile(&self, user_id: &str) -> Result<Option<PeerProfile>, MembershipError>;

    /// Groups `user_id` is a member of.
    fn user_groups(&self, user_id: &str) -> Result<Vec<GroupOverview>, MembershipError>;

    /// Number of members in a group.
    fn group_member_count(&self, group_id: &str) -> Result<u32, MembershipError>;

    /// Up to `limit` member avatar URLs for the group list preview.
    fn group_member_avatars(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, MembershipError>;

    /// Whether `user_id` currently belongs to `group_id`.
    fn is_group_member(&self, group_id: &str, user_id: &str) -> Result<bool, MembershipError>;
}
