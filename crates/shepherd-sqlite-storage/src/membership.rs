//! Implementation of MembershipIndex trait for SQLite storage.

use rusqlite::{params, OptionalExtension};
use shepherd_storage_traits::{
    GroupOverview, MembershipError, MembershipIndex, PeerProfile,
};

use crate::{db, ShepherdSqliteStorage};

#[inline]
fn into_membership_err<T>(e: T) -> MembershipError
where
    T: std::error::Error,
{
    MembershipError::DatabaseError(e.to_string())
}

impl MembershipIndex for ShepherdSqliteStorage {
    fn church_peers(
        &self,
        church_id: &str,
        exclude_user_id: &str,
    ) -> Result<Vec<PeerProfile>, MembershipError> {
        self.with_connection(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM churches WHERE id = ?)",
                    params![church_id],
                    |row| row.get(0),
                )
                .map_err(into_membership_err)?;
            if !exists {
                return Err(MembershipError::NotFound(format!("church {church_id}")));
            }

            let mut stmt = conn
                .prepare(
                    "SELECT id, name, avatar_url FROM users
                     WHERE church_id = ? AND id != ?
                     ORDER BY name ASC, id ASC",
                )
                .map_err(into_membership_err)?;
            let rows = stmt
                .query_map(params![church_id, exclude_user_id], db::row_to_peer_profile)
                .map_err(into_membership_err)?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(into_membership_err)
        })
    }

    fn peer_profile(&self, user_id: &str) -> Result<Option<PeerProfile>, MembershipError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, name, avatar_url FROM users WHERE id = ?",
                params![user_id],
                db::row_to_peer_profile,
            )
            .optional()
            .map_err(into_membership_err)
        })
    }

    fn user_groups(&self, user_id: &str) -> Result<Vec<GroupOverview>, MembershipError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT g.id, g.name, g.image_url
                     FROM groups g
                     JOIN group_members gm ON gm.group_id = g.id
                     WHERE gm.user_id = ?
                     ORDER BY g.name ASC, g.id ASC",
                )
                .map_err(into_membership_err)?;
            let rows = stmt
                .query_map(params![user_id], db::row_to_group_overview)
                .map_err(into_membership_err)?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(into_membership_err)
        })
    }

    fn group_member_count(&self, group_id: &str) -> Result<u32, MembershipError> {
        self.with_connection(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM groups WHERE id = ?)",
                    params![group_id],
                    |row| row.get(0),
                )
                .map_err(into_membership_err)?;
            if !exists {
                return Err(MembershipError::NotFound(format!("group {group_id}")));
            }
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM group_members WHERE group_id = ?",
                    params![group_id],
                    |row| row.get(0),
                )
                .map_err(into_membership_err)?;
            Ok(count as u32)
        })
    }

    fn group_member_avatars(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, MembershipError> {
        self.with_connection(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM groups WHERE id = ?)",
                    params![group_id],
                    |row| row.get(0),
                )
                .map_err(into_membership_err)?;
            if !exists {
                return Err(MembershipError::NotFound(format!("group {group_id}")));
            }

            let mut stmt = conn
                .prepare(
                    "SELECT u.avatar_url
                     FROM group_members gm
                     JOIN users u ON u.id = gm.user_id
                     WHERE gm.group_id = ? AND u.avatar_url IS NOT NULL
                     ORDER BY gm.rowid ASC
                     LIMIT ?",
                )
                .map_err(into_membership_err)?;
            let rows = stmt
                .query_map(params![group_id, limit as i64], |row| row.get(0))
                .map_err(into_membership_err)?;
            rows.collect::<Result<Vec<String>, _>>()
                .map_err(into_membership_err)
        })
    }

    fn is_group_member(&self, group_id: &str, user_id: &str) -> Result<bool, MembershipError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ?)",
                params![group_id, user_id],
                |row| row.get(0),
            )
            .map_err(into_membership_err)
        })
    }
}
