use serde::{Deserialize, Serialize};
use shepherd_storage_traits::{ConversationKey, Viewer};

#[derive(Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub router: Router,
    pub session: SessionState,
    pub busy: BusyState,
    pub direct_chats: Vec<DirectChatSummary>,
    pub group_chats: Vec<GroupChatSummary>,
    pub current_thread: Option<ThreadViewState>,
    /// Restored when a send fails so the user can edit and retry.
    pub compose_draft: Option<String>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            router: Router {
                default_screen: Screen::ChatList,
                screen_stack: vec![],
            },
            session: SessionState::Inactive,
            busy: BusyState::idle(),
            direct_chats: vec![],
            group_chats: vec![],
            current_thread: None,
            compose_draft: None,
            toast: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Inactive,
    Active { viewer: Viewer },
}

impl SessionState {
    pub fn viewer(&self) -> Option<&Viewer> {
        match self {
            Self::Active { viewer } => Some(viewer),
            Self::Inactive => None,
        }
    }
}

/// "In flight" flags for operations the UI should reflect. UX-relevant async
/// operation state lives in Rust so the native side never has to guess
/// (e.g., resetting spinners on toast).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub starting_session: bool,
    pub refreshing_chats: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            starting_session: false,
            refreshing_chats: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Router {
    pub default_screen: Screen,
    pub screen_stack: Vec<Screen>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Screen {
    ChatList,
    DirectChat { peer_id: String },
    GroupChat { group_id: String },
}

/// The conversation a user-facing action refers to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatTarget {
    Direct { peer_id: String },
    Group { group_id: String },
}

impl ChatTarget {
    /// The storage key for this target from `viewer_id`'s perspective.
    pub fn conversation_key(&self, viewer_id: &str) -> ConversationKey {
        match self {
            Self::Direct { peer_id } => ConversationKey::direct(viewer_id, peer_id),
            Self::Group { group_id } => ConversationKey::group(group_id),
        }
    }

    pub fn screen(&self) -> Screen {
        match self {
            Self::Direct { peer_id } => Screen::DirectChat {
                peer_id: peer_id.clone(),
            },
            Self::Group { group_id } => Screen::GroupChat {
                group_id: group_id.clone(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectChatSummary {
    pub peer_id: String,
    pub peer_name: String,
    pub peer_avatar_url: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<i64>,
    /// Humanized age of the last message ("now", "5m", "2h", ...).
    pub last_message_age: Option<String>,
    pub unread_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupChatSummary {
    pub group_id: String,
    pub name: String,
    pub image_url: Option<String>,
    pub member_count: u32,
    pub member_avatar_urls: Vec<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<i64>,
    pub last_message_age: Option<String>,
    pub unread_count: u32,
}

#[derive(Clone, Debug)]
pub struct ThreadViewState {
    pub target: ChatTarget,
    /// Peer name or group name, for the thread header.
    pub title: String,
    pub messages: Vec<ThreadMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub body: String,
    pub timestamp: i64,
    pub is_mine: bool,
    pub delivery: MessageDeliveryState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageDeliveryState {
    Pending,
    Sent,
    Failed { reason: String },
}

pub fn now_seconds() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Compact humanized age for chat list rows.
///
/// Sub-minute renders as "now", then "Nm" / "Nh" / "Nd" up to a week, and a
/// short month-day date beyond that. Future timestamps (clock skew between
/// devices) render as "now".
pub fn relative_age(now: i64, then: i64) -> String {
    use chrono::{TimeZone, Utc};

    let delta = now - then;
    if delta < 60 {
        return "now".to_string();
    }
    let minutes = delta / 60;
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h");
    }
    let days = hours / 24;
    if days < 7 {
        return format!("{days}d");
    }
    match Utc.timestamp_opt(then, 0).single() {
        Some(dt) => dt.format("%b %-d").to_string(),
        None => format!("{days}d"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_target_maps_to_key_and_screen() {
        let target = ChatTarget::Direct {
            peer_id: "u2".to_string(),
        };
        assert_eq!(
            target.conversation_key("u1"),
            ConversationKey::direct("u1", "u2")
        );
        assert_eq!(
            target.screen(),
            Screen::DirectChat {
                peer_id: "u2".to_string()
            }
        );

        let target = ChatTarget::Group {
            group_id: "g1".to_string(),
        };
        assert_eq!(target.conversation_key("u1"), ConversationKey::group("g1"));
    }

    #[test]
    fn relative_age_buckets() {
        let now = 1_700_000_000;
        assert_eq!(relative_age(now, now), "now");
        assert_eq!(relative_age(now, now - 59), "now");
        assert_eq!(relative_age(now, now + 120), "now");
        assert_eq!(relative_age(now, now - 60), "1m");
        assert_eq!(relative_age(now, now - 59 * 60), "59m");
        assert_eq!(relative_age(now, now - 3 * 3600), "3h");
        assert_eq!(relative_age(now, now - 2 * 86_400), "2d");
        // A week or more renders a short date.
        let age = relative_age(now, now - 30 * 86_400);
        assert!(age.contains(' '), "expected a month-day date, got {age}");
    }
}
