//! Role types and the viewer identity context.
//!
//! The account-wide role and the per-membership group role are deliberately
//! two distinct enums. The original data model reused one dynamic field for
//! both, which let a group-scope promotion silently rewrite the account
//! role; keeping the types apart makes that cross-write unrepresentable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account-wide role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemRole {
    /// Regular volunteer.
    Volunteer,
    /// Church administrator.
    Admin,
    /// Cross-church administrator.
    MasterAdmin,
}

impl SystemRole {
    /// Stable string form used in storage rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Volunteer => "Volunteer",
            Self::Admin => "Admin",
            Self::MasterAdmin => "MasterAdmin",
        }
    }
}

impl fmt::Display for SystemRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Volunteer" => Ok(Self::Volunteer),
            "Admin" => Ok(Self::Admin),
            "MasterAdmin" => Ok(Self::MasterAdmin),
            other => Err(format!("unknown system role: {other}")),
        }
    }
}

/// Role within one group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupRole {
    /// Regular member.
    Member,
    /// Leader of the group.
    TeamLeader,
}

impl GroupRole {
    /// Stable string form used in storage rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "Member",
            Self::TeamLeader => "TeamLeader",
        }
    }
}

impl fmt::Display for GroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Member" => Ok(Self::Member),
            "TeamLeader" => Ok(Self::TeamLeader),
            other => Err(format!("unknown group role: {other}")),
        }
    }
}

/// The active user, resolved by the external identity provider and threaded
/// through the core by value. There is no ambient current-user singleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    /// Stable user id.
    pub user_id: String,
    /// Account-wide role.
    pub role: SystemRole,
    /// Church the user belongs to.
    pub church_id: String,
}
