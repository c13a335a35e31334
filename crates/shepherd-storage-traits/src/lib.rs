//! Shepherd storage traits - the vocabulary shared by the messaging core and
//! its storage backends.
//!
//! The core never talks to a concrete database; it consumes the
//! [`MessageStorage`] and [`MembershipIndex`] traits and pushes newly
//! persisted rows through a [`RealtimeSink`]. Backends (in-memory, SQLite, a
//! hosted service) implement these traits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod key;
pub mod membership;
pub mod messages;
pub mod roles;

pub use error::{MembershipError, MessageError};
pub use key::ConversationKey;
pub use membership::{GroupOverview, MembershipIndex, PeerProfile};
pub use messages::{DirectMessage, GroupMessage, MessagePreview, MessageStorage, RowInsert};
pub use roles::{GroupRole, SystemRole, Viewer};

/// Kind of storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Non-persistent in-memory backend.
    Memory,
    /// SQLite file backend.
    SQLite,
}

impl Backend {
    /// Check if the backend survives process restart.
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Self::Memory)
    }
}

/// Receiver for row-level insert notifications emitted by a storage backend.
///
/// A backend that has a sink attached must call [`RealtimeSink::row_inserted`]
/// exactly once per successful append, after the row is durable. The sink is
/// free to fan the row out to any number of subscribers (the core's realtime
/// bus implements this trait).
pub trait RealtimeSink: Send + Sync {
    /// A message row was appended to the store.
    fn row_inserted(&self, row: RowInsert);
}

#[cfg(test)]
mod tests {
    use super::Backend;

    #[test]
    fn memory_backend_is_not_persistent() {
        assert!(!Backend::Memory.is_persistent());
        assert!(Backend::SQLite.is_persistent());
    }
}
