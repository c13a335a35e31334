//! Memory-based storage backend for the Shepherd messaging core.
//!
//! Implements [`MessageStorage`] and [`MembershipIndex`] over in-process
//! state behind a `parking_lot::RwLock`. Non-persistent; everything is
//! cleared when the value is dropped. Useful for tests and for running the
//! core fully offline.
//!
//! The backend carries seeding helpers (`add_church`, `add_user`,
//! `add_group`, `add_group_member`) standing in for the external signup and
//! invite flows, and a write-failure switch ([`ShepherdMemoryStorage::
//! set_fail_writes`]) so tests can exercise optimistic-send rollback
//! deterministically.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use shepherd_storage_traits::{
    Backend, DirectMessage, GroupMessage, GroupOverview, GroupRole, PeerProfile, RealtimeSink,
    SystemRole,
};

mod membership;
mod messages;

#[derive(Debug, Clone)]
pub(crate) struct UserRecord {
    pub(crate) profile: PeerProfile,
    pub(crate) church_id: String,
    #[allow(dead_code)]
    pub(crate) role: SystemRole,
}

#[derive(Default)]
pub(crate) struct Inner {
    pub(crate) churches: HashMap<String, String>,
    pub(crate) users: HashMap<String, UserRecord>,
    pub(crate) groups: HashMap<String, GroupOverview>,
    // group_id -> (user_id, role), in join order
    pub(crate) group_members: HashMap<String, Vec<(String, GroupRole)>>,
    // Append order == ascending created_at (timestamps are monotonic).
    pub(crate) direct: Vec<DirectMessage>,
    pub(crate) group_msgs: Vec<GroupMessage>,
    pub(crate) last_ts: i64,
}

/// In-memory storage backend.
pub struct ShepherdMemoryStorage {
    pub(crate) inner: RwLock<Inner>,
    sink: RwLock<Option<Arc<dyn RealtimeSink>>>,
    fail_writes: AtomicBool,
}

impl Default for ShepherdMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ShepherdMemoryStorage {
    /// Create an empty backend with no realtime sink attached.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            sink: RwLock::new(None),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Kind of backend, for host-side diagnostics.
    pub fn backend(&self) -> Backend {
        Backend::Memory
    }

    /// Attach the sink that receives a notification per successful append.
    pub fn set_realtime_sink(&self, sink: Arc<dyn RealtimeSink>) {
        *self.sink.write() = Some(sink);
    }

    /// When set, every append fails with a transient error. Reads are
    /// unaffected. Test hook for send-rollback paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn writes_failing(&self) -> bool {
        self.fail_writes.load(Ordering::SeqCst)
    }

    pub(crate) fn notify(&self, row: shepherd_storage_traits::RowInsert) {
        // Fired outside the state lock; the sink may re-enter the store.
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.row_inserted(row);
        }
    }

    /// Server timestamps are monotonic: rapid appends within one second get
    /// distinct, increasing timestamps so thread order is deterministic.
    pub(crate) fn next_timestamp(inner: &mut Inner) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        if now <= inner.last_ts {
            inner.last_ts += 1;
        } else {
            inner.last_ts = now;
        }
        inner.last_ts
    }

    // Seeding helpers. These model the external signup/invite flows, which
    // are out of scope for the messaging core itself.

    /// Register a church.
    pub fn add_church(&self, church_id: &str, name: &str) {
        self.inner
            .write()
            .churches
            .insert(church_id.to_string(), name.to_string());
    }

    /// Register a user in a church.
    pub fn add_user(
        &self,
        user_id: &str,
        name: &str,
        avatar_url: Option<&str>,
        church_id: &str,
        role: SystemRole,
    ) {
        self.inner.write().users.insert(
            user_id.to_string(),
            UserRecord {
                profile: PeerProfile {
                    id: user_id.to_string(),
                    name: name.to_string(),
                    avatar_url: avatar_url.map(str::to_string),
                },
                church_id: church_id.to_string(),
                role,
            },
        );
    }

    /// Register a group.
    pub fn add_group(&self, group_id: &str, name: &str, image_url: Option<&str>) {
        self.inner.write().groups.insert(
            group_id.to_string(),
            GroupOverview {
                group_id: group_id.to_string(),
                name: name.to_string(),
                image_url: image_url.map(str::to_string),
            },
        );
    }

    /// Add a user to a group with the given group-scoped role.
    pub fn add_group_member(&self, group_id: &str, user_id: &str, role: GroupRole) {
        let mut inner = self.inner.write();
        let members = inner.group_members.entry(group_id.to_string()).or_default();
        if !members.iter().any(|(id, _)| id == user_id) {
            members.push((user_id.to_string(), role));
        }
    }

    /// Remove a user from a group. Messages they already sent stay.
    pub fn remove_group_member(&self, group_id: &str, user_id: &str) {
        let mut inner = self.inner.write();
        if let Some(members) = inner.group_members.get_mut(group_id) {
            members.retain(|(id, _)| id != user_id);
        }
    }

    /// Remove a user entirely (tests for the vanished-peer path).
    pub fn remove_user(&self, user_id: &str) {
        self.inner.write().users.remove(user_id);
    }
}
