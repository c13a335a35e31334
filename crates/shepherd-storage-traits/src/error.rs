//! Error types shared by all storage backends.

use thiserror::Error;

/// Errors returned by [`crate::MessageStorage`] operations.
#[derive(Debug, Clone, Error)]
pub enum MessageError {
    /// Invalid parameters (empty body, sender == receiver, ...). Detected
    /// before any row is written.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    /// The sender is not a member of the target group.
    #[error("sender is not a member of the group")]
    NotGroupMember,
    /// The referenced conversation, peer or group does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Backend-level failure (connectivity, I/O, SQL). Treated as transient
    /// by the core.
    #[error("database error: {0}")]
    DatabaseError(String),
}

/// Errors returned by [`crate::MembershipIndex`] operations.
#[derive(Debug, Clone, Error)]
pub enum MembershipError {
    /// The referenced user, church or group does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Backend-level failure. Treated as transient by the core.
    #[error("database error: {0}")]
    DatabaseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_error_display() {
        let err = MessageError::InvalidParameters("empty body".to_string());
        assert_eq!(err.to_string(), "invalid parameters: empty body");

        let err = MessageError::DatabaseError("connection lost".to_string());
        assert_eq!(err.to_string(), "database error: connection lost");
    }

    #[test]
    fn membership_error_display() {
        let err = MembershipError::NotFound("group g1".to_string());
        assert_eq!(err.to_string(), "not found: group g1");
    }
}
