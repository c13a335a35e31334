//! SQLite-based storage backend for the Shepherd messaging core.
//!
//! Implements [`MessageStorage`](shepherd_storage_traits::MessageStorage) and
//! [`MembershipIndex`](shepherd_storage_traits::MembershipIndex) over a single
//! SQLite connection. Persistent; useful for production deployments and for
//! exercising the core against a durable backend.
//!
//! ```no_run
//! use shepherd_sqlite_storage::ShepherdSqliteStorage;
//!
//! let storage = ShepherdSqliteStorage::new("/path/to/db.sqlite")?;
//! # Ok::<(), shepherd_sqlite_storage::error::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use rusqlite::{params, Connection};
use shepherd_storage_traits::{Backend, GroupRole, RealtimeSink, RowInsert, SystemRole};

mod db;
pub mod error;
mod membership;
mod messages;
mod migrations;

use self::error::Error;

/// A SQLite-based storage backend.
///
/// A single connection serves both the message tables and the membership
/// tables so that appends and membership checks see one consistent database.
pub struct ShepherdSqliteStorage {
    connection: Arc<Mutex<Connection>>,
    sink: RwLock<Option<Arc<dyn RealtimeSink>>>,
}

impl ShepherdSqliteStorage {
    /// Open (or create) the database at `file_path` and run migrations.
    pub fn new<P>(file_path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let mut connection = Connection::open(file_path)?;
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            sink: RwLock::new(None),
        })
    }

    /// Kind of backend, for host-side diagnostics.
    pub fn backend(&self) -> Backend {
        Backend::SQLite
    }

    /// Attach the sink that receives a notification per successful append.
    pub fn set_realtime_sink(&self, sink: Arc<dyn RealtimeSink>) {
        if let Ok(mut slot) = self.sink.write() {
            *slot = Some(sink);
        }
    }

    pub(crate) fn notify(&self, row: RowInsert) {
        // Fired outside the connection lock; the sink may re-enter the store.
        let sink = self.sink.read().ok().and_then(|slot| slot.clone());
        if let Some(sink) = sink {
            sink.row_inserted(row);
        }
    }

    /// Provides access to the underlying connection for storage operations.
    pub(crate) fn with_connection<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Connection) -> T,
    {
        let conn = match self.connection.lock() {
            Ok(conn) => conn,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&conn)
    }

    /// Next server timestamp. Monotonic across both message tables so rapid
    /// appends keep a deterministic order. Called under the connection lock.
    pub(crate) fn next_timestamp(conn: &Connection) -> Result<i64, rusqlite::Error> {
        let last: i64 = conn.query_row(
            "SELECT COALESCE(MAX(created_at), 0) FROM (
                 SELECT created_at FROM messages
                 UNION ALL
                 SELECT created_at FROM group_messages
             )",
            [],
            |row| row.get(0),
        )?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Ok(if now <= last { last + 1 } else { now })
    }

    // Seeding helpers. These model the external signup/invite flows, which
    // are out of scope for the messaging core itself.

    /// Register a church.
    pub fn add_church(&self, church_id: &str, name: &str) -> Result<(), Error> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO churches (id, name) VALUES (?, ?)",
                params![church_id, name],
            )?;
            Ok(())
        })
    }

    /// Register a user in a church.
    pub fn add_user(
        &self,
        user_id: &str,
        name: &str,
        avatar_url: Option<&str>,
        church_id: &str,
        role: SystemRole,
    ) -> Result<(), Error> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO users (id, name, avatar_url, church_id, role)
                 VALUES (?, ?, ?, ?, ?)",
                params![user_id, name, avatar_url, church_id, role.as_str()],
            )?;
            Ok(())
        })
    }

    /// Register a group.
    pub fn add_group(
        &self,
        group_id: &str,
        name: &str,
        image_url: Option<&str>,
    ) -> Result<(), Error> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO groups (id, name, image_url) VALUES (?, ?, ?)",
                params![group_id, name, image_url],
            )?;
            Ok(())
        })
    }

    /// Add a user to a group with the given group-scoped role.
    pub fn add_group_member(
        &self,
        group_id: &str,
        user_id: &str,
        role: GroupRole,
    ) -> Result<(), Error> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role)
                 VALUES (?, ?, ?)",
                params![group_id, user_id, role.as_str()],
            )?;
            Ok(())
        })
    }

    /// Remove a user from a group. Messages they already sent stay.
    pub fn remove_group_member(&self, group_id: &str, user_id: &str) -> Result<(), Error> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM group_members WHERE group_id = ? AND user_id = ?",
                params![group_id, user_id],
            )?;
            Ok(())
        })
    }
}
