//! Conversation keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a message thread: an unordered pair of user ids (direct) or a
/// group id.
///
/// The direct variant is normalized so that `a <= b`; two keys built from the
/// same pair in either order compare equal and hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationKey {
    /// One-to-one thread between two users.
    Direct {
        /// Lexicographically smaller user id.
        a: String,
        /// Lexicographically larger user id.
        b: String,
    },
    /// Group thread.
    Group {
        /// Group id.
        group_id: String,
    },
}

impl ConversationKey {
    /// Build a direct key from a pair of user ids in any order.
    pub fn direct(x: impl Into<String>, y: impl Into<String>) -> Self {
        let (x, y) = (x.into(), y.into());
        if x <= y {
            Self::Direct { a: x, b: y }
        } else {
            Self::Direct { a: y, b: x }
        }
    }

    /// Build a group key.
    pub fn group(group_id: impl Into<String>) -> Self {
        Self::Group {
            group_id: group_id.into(),
        }
    }

    /// For a direct key, the participant that is not `viewer` (either side if
    /// the viewer is not a participant). `None` for group keys.
    pub fn peer_of(&self, viewer: &str) -> Option<&str> {
        match self {
            Self::Direct { a, b } => {
                if a == viewer {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            Self::Group { .. } => None,
        }
    }

    /// Whether the key is a direct thread involving `user`.
    pub fn involves(&self, user: &str) -> bool {
        match self {
            Self::Direct { a, b } => a == user || b == user,
            Self::Group { .. } => false,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { a, b } => write!(f, "direct:{a}:{b}"),
            Self::Group { group_id } => write!(f, "group:{group_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ConversationKey;

    #[test]
    fn direct_key_is_unordered() {
        let k1 = ConversationKey::direct("u2", "u1");
        let k2 = ConversationKey::direct("u1", "u2");
        assert_eq!(k1, k2);
        assert_eq!(k1.to_string(), "direct:u1:u2");
    }

    #[test]
    fn peer_of_resolves_the_other_side() {
        let key = ConversationKey::direct("u1", "u2");
        assert_eq!(key.peer_of("u1"), Some("u2"));
        assert_eq!(key.peer_of("u2"), Some("u1"));
        assert_eq!(ConversationKey::group("g1").peer_of("u1"), None);
    }

    #[test]
    fn involves_checks_direct_participants() {
        let key = ConversationKey::direct("u1", "u2");
        assert!(key.involves("u1"));
        assert!(key.involves("u2"));
        assert!(!key.involves("u3"));
        assert!(!ConversationKey::group("g1").involves("u1"));
    }
}
