use shepherd_storage_traits::{ConversationKey, MessageError, RowInsert};

use crate::bus::BusEvent;
use crate::state::{
    AppState, BusyState, ChatTarget, DirectChatSummary, GroupChatSummary, Router, SessionState,
    ThreadViewState,
};
use crate::AppAction;

#[derive(Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
    RouterChanged {
        rev: u64,
        router: Router,
    },
    SessionChanged {
        rev: u64,
        session: SessionState,
    },
    BusyChanged {
        rev: u64,
        busy: BusyState,
    },
    DirectChatsChanged {
        rev: u64,
        direct_chats: Vec<DirectChatSummary>,
    },
    GroupChatsChanged {
        rev: u64,
        group_chats: Vec<GroupChatSummary>,
    },
    CurrentThreadChanged {
        rev: u64,
        current_thread: Option<ThreadViewState>,
    },
    ComposeDraftChanged {
        rev: u64,
        compose_draft: Option<String>,
    },
    ToastChanged {
        rev: u64,
        toast: Option<String>,
    },
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
            AppUpdate::RouterChanged { rev, .. } => *rev,
            AppUpdate::SessionChanged { rev, .. } => *rev,
            AppUpdate::BusyChanged { rev, .. } => *rev,
            AppUpdate::DirectChatsChanged { rev, .. } => *rev,
            AppUpdate::GroupChatsChanged { rev, .. } => *rev,
            AppUpdate::CurrentThreadChanged { rev, .. } => *rev,
            AppUpdate::ComposeDraftChanged { rev, .. } => *rev,
            AppUpdate::ToastChanged { rev, .. } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

#[derive(Debug)]
pub enum InternalEvent {
    /// Bus delivery for the session subscription. `epoch` identifies which
    /// session the forwarder belonged to; stale epochs are dropped.
    Realtime { epoch: u64, event: BusEvent },

    /// Result of an `append_*` call spawned for an optimistic send.
    SendMessageResult {
        target: ChatTarget,
        temp_id: String,
        result: Result<RowInsert, MessageError>,
    },

    /// A fire-and-forget `mark_read` finished; lists may need a recount.
    MarkReadCompleted { key: ConversationKey },

    /// Config-gated safety-net tick.
    SafetyPoll { epoch: u64 },

    Toast(String),
}
