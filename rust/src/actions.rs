use shepherd_storage_traits::Viewer;

use crate::state::{ChatTarget, Screen};

#[derive(Debug, Clone)]
pub enum AppAction {
    // Session
    StartSession { viewer: Viewer },
    EndSession,

    // Navigation
    PushScreen { screen: Screen },
    UpdateScreenStack { stack: Vec<Screen> },

    // Chat
    OpenChat { target: ChatTarget },
    CloseChat,
    SendMessage { target: ChatTarget, body: String },
    RefreshChats,

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes message bodies).
    pub fn tag(&self) -> &'static str {
        match self {
            AppAction::StartSession { .. } => "StartSession",
            AppAction::EndSession => "EndSession",
            AppAction::PushScreen { .. } => "PushScreen",
            AppAction::UpdateScreenStack { .. } => "UpdateScreenStack",
            AppAction::OpenChat { .. } => "OpenChat",
            AppAction::CloseChat => "CloseChat",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::RefreshChats => "RefreshChats",
            AppAction::ClearToast => "ClearToast",
            AppAction::Foregrounded => "Foregrounded",
        }
    }
}
