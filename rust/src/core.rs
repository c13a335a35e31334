use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread as std_thread;

use flume::Sender;
use uuid::Uuid;

use shepherd_storage_traits::{
    ConversationKey, MembershipIndex, MessageStorage, RowInsert, Viewer,
};

use crate::actions::AppAction;
use crate::bus::{BusEvent, RealtimeBus, SubscriptionFilter};
use crate::state::{
    now_seconds, relative_age, AppState, BusyState, ChatTarget, DirectChatSummary,
    GroupChatSummary, MessageDeliveryState, Screen, SessionState, ThreadViewState,
};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

mod aggregator;
mod config;
mod thread;

use config::{load_app_config, AppConfig};
use thread::LocalOutgoing;

struct Session {
    viewer: Viewer,
    /// Guards in-flight async results and bus forwarders; bumped on every
    /// (re)subscribe and on session end.
    epoch: u64,
    subscription: crate::bus::Subscription,
    /// Epoch of the safety poll loop; unlike `epoch` it survives
    /// resubscribes and only changes with the session itself.
    poll_epoch: u64,
    /// Last bus delivery sequence seen. `None` right after (re)subscribe or
    /// reconnect: the next insert is accepted at whatever seq it carries.
    last_seq: Option<u64>,
    group_ids: HashSet<String>,
}

pub struct AppCore {
    pub state: AppState,
    rev: u64,
    outbox_seq: u64,
    last_outgoing_ts: i64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: AppConfig,
    runtime: tokio::runtime::Runtime,

    store: Arc<dyn MessageStorage>,
    membership: Arc<dyn MembershipIndex>,
    bus: Arc<RealtimeBus>,

    session: Option<Session>,
    session_epoch: u64,
    // Mirrors the live poll epoch so stale poll loops stop themselves.
    poll_epoch: Arc<AtomicU64>,

    // Actor-internal bookkeeping for optimistic sends.
    delivery_overrides: HashMap<ConversationKey, HashMap<String, MessageDeliveryState>>,
    local_outbox: HashMap<ConversationKey, HashMap<String, LocalOutgoing>>,
    // Cursor for incremental thread fetches of the open conversation.
    thread_last_stored_id: Option<String>,
}

impl AppCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        store: Arc<dyn MessageStorage>,
        membership: Arc<dyn MembershipIndex>,
        bus: Arc<RealtimeBus>,
    ) -> Self {
        let config = load_app_config(&data_dir);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state: AppState::empty(),
            rev: 0,
            outbox_seq: 0,
            last_outgoing_ts: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            store,
            membership,
            bus,
            session: None,
            session_epoch: 0,
            poll_epoch: Arc::new(AtomicU64::new(0)),
            delivery_overrides: HashMap::new(),
            local_outbox: HashMap::new(),
            thread_last_stored_id: None,
        };

        // Ensure App.state() has an immediately-available snapshot.
        this.commit_state();
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn emit(&mut self, update: AppUpdate) {
        self.commit_state();
        let _ = self.update_sender.send(update);
    }

    fn commit_state(&self) {
        let snapshot = self.state.clone();
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot,
            Err(poison) => *poison.into_inner() = snapshot,
        }
    }

    /// One coherent snapshot, for points where the UI rebuilds wholesale
    /// (session start, foreground) rather than patching.
    fn emit_full_state(&mut self) {
        self.next_rev();
        self.emit(AppUpdate::FullState(self.state.clone()));
    }

    fn emit_router(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::RouterChanged {
            rev,
            router: self.state.router.clone(),
        });
    }

    fn emit_session(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::SessionChanged {
            rev,
            session: self.state.session.clone(),
        });
    }

    fn emit_busy(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::BusyChanged {
            rev,
            busy: self.state.busy.clone(),
        });
    }

    fn emit_direct_chats(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::DirectChatsChanged {
            rev,
            direct_chats: self.state.direct_chats.clone(),
        });
    }

    fn emit_group_chats(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::GroupChatsChanged {
            rev,
            group_chats: self.state.group_chats.clone(),
        });
    }

    fn emit_current_thread(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::CurrentThreadChanged {
            rev,
            current_thread: self.state.current_thread.clone(),
        });
    }

    fn emit_compose_draft(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::ComposeDraftChanged {
            rev,
            compose_draft: self.state.compose_draft.clone(),
        });
    }

    fn emit_toast(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::ToastChanged {
            rev,
            toast: self.state.toast.clone(),
        });
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Kept in state until the UI explicitly clears it, so a state()
        // resync never loses it.
        self.state.toast = Some(msg.into());
        self.emit_toast();
    }

    fn set_busy(&mut self, f: impl FnOnce(&mut BusyState)) {
        let mut next = self.state.busy.clone();
        f(&mut next);
        if next != self.state.busy {
            self.state.busy = next;
            self.emit_busy();
        }
    }

    fn viewer(&self) -> Option<Viewer> {
        self.session.as_ref().map(|s| s.viewer.clone())
    }

    /// Conversation key of the currently open thread, if any.
    fn open_key(&self) -> Option<ConversationKey> {
        let viewer = self.session.as_ref()?;
        self.state
            .current_thread
            .as_ref()
            .map(|t| t.target.conversation_key(&viewer.viewer.user_id))
    }

    fn push_screen(&mut self, screen: Screen) {
        if self.state.router.screen_stack.last() != Some(&screen) {
            self.state.router.screen_stack.push(screen);
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::StartSession { viewer } => {
                self.set_busy(|b| b.starting_session = true);
                if let Err(e) = self.start_session(viewer) {
                    self.set_busy(|b| b.starting_session = false);
                    self.toast(format!("Could not start session: {e:#}"));
                } else {
                    self.set_busy(|b| b.starting_session = false);
                }
            }
            AppAction::EndSession => {
                self.stop_session();
                self.state.session = SessionState::Inactive;
                self.state.router.screen_stack.clear();
                self.state.direct_chats = vec![];
                self.state.group_chats = vec![];
                self.state.current_thread = None;
                self.state.compose_draft = None;
                self.state.busy = BusyState::idle();
                self.emit_session();
                self.emit_router();
                self.emit_busy();
                self.emit_direct_chats();
                self.emit_group_chats();
                self.emit_current_thread();
                self.emit_compose_draft();
            }

            // Navigation
            AppAction::PushScreen { screen } => {
                if self.session.is_none() {
                    self.toast("No active session");
                    return;
                }
                self.push_screen(screen);
                self.sync_current_thread_to_router();
                self.emit_router();
            }
            AppAction::UpdateScreenStack { stack } => {
                self.state.router.screen_stack = stack;
                self.sync_current_thread_to_router();
                self.emit_router();
            }

            // Chat
            AppAction::OpenChat { target } => {
                let Some(viewer) = self.viewer() else {
                    self.toast("No active session");
                    return;
                };
                if !self.target_exists(&viewer, &target) {
                    self.toast(match &target {
                        ChatTarget::Direct { .. } => "Person not found",
                        ChatTarget::Group { .. } => "Group not found",
                    });
                    return;
                }
                self.push_screen(target.screen());
                self.open_thread(&viewer, target);
                self.emit_router();
            }
            AppAction::CloseChat => {
                if matches!(
                    self.state.router.screen_stack.last(),
                    Some(Screen::DirectChat { .. } | Screen::GroupChat { .. })
                ) {
                    self.state.router.screen_stack.pop();
                }
                self.sync_current_thread_to_router();
                self.emit_router();
            }
            AppAction::SendMessage { target, body } => {
                self.send_message(target, body);
            }
            AppAction::RefreshChats => {
                if self.session.is_none() {
                    return;
                }
                self.set_busy(|b| b.refreshing_chats = true);
                self.refresh_chat_lists();
                self.set_busy(|b| b.refreshing_chats = false);
            }

            // UI
            AppAction::ClearToast => {
                if self.state.toast.is_some() {
                    self.state.toast = None;
                    self.emit_toast();
                }
            }

            // Lifecycle
            AppAction::Foregrounded => {
                // Native sends lifecycle signals as actions. Rust owns all
                // state changes.
                if self.session.is_some() {
                    self.refresh_all();
                    self.emit_full_state();
                }
            }
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::Realtime { epoch, event } => {
                let Some(sess) = self.session.as_ref() else {
                    return;
                };
                // Stale forwarder (previous session or previous subscription).
                if epoch != sess.epoch {
                    return;
                }
                self.handle_bus_event(event);
            }
            InternalEvent::SendMessageResult {
                target,
                temp_id,
                result,
            } => self.handle_send_result(target, temp_id, result),
            InternalEvent::MarkReadCompleted { key } => {
                tracing::debug!(%key, "mark_read completed");
                self.refresh_chat_lists();
            }
            InternalEvent::SafetyPoll { epoch } => {
                if self.session.as_ref().map(|s| s.poll_epoch) == Some(epoch) {
                    tracing::debug!("safety poll tick");
                    self.refresh_all();
                }
            }
            InternalEvent::Toast(msg) => {
                tracing::info!(msg, "toast");
                self.toast(msg);
            }
        }
    }

    fn handle_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::Reconnected => {
                tracing::info!("bus reconnected, resyncing from storage");
                if let Some(sess) = self.session.as_mut() {
                    sess.last_seq = None;
                }
                self.refresh_all();
                self.mark_open_thread_read();
            }
            BusEvent::Insert { seq, row } => {
                let gapped = {
                    let Some(sess) = self.session.as_mut() else {
                        return;
                    };
                    let gapped = sess.last_seq.is_some_and(|last| seq != last + 1);
                    sess.last_seq = Some(seq);
                    gapped
                };
                if gapped {
                    tracing::warn!(seq, "bus sequence gap, resyncing from storage");
                    self.refresh_all();
                    // Resynced rows may have landed in the viewed thread.
                    self.mark_open_thread_read();
                    return;
                }

                let key = row.conversation_key();
                if self.open_key().as_ref() == Some(&key) {
                    self.extend_current_thread();
                    // Viewing the conversation: consume the unread immediately.
                    self.spawn_mark_read(key);
                }
                self.refresh_chat_lists();
            }
        }
    }

    fn handle_send_result(
        &mut self,
        target: ChatTarget,
        temp_id: String,
        result: Result<RowInsert, shepherd_storage_traits::MessageError>,
    ) {
        let Some(viewer) = self.viewer() else {
            return;
        };
        let key = target.conversation_key(&viewer.user_id);

        let removed = self
            .local_outbox
            .get_mut(&key)
            .and_then(|m| m.remove(&temp_id));
        if let Some(m) = self.delivery_overrides.get_mut(&key) {
            m.remove(&temp_id);
        }

        match result {
            Ok(row) => {
                tracing::debug!(id = row.id(), "send confirmed");
                // The server row replaces the optimistic entry; the next
                // storage read (below, or via the realtime echo) carries it.
                if self.open_key().as_ref() == Some(&key) {
                    self.refresh_current_thread();
                }
                self.refresh_chat_lists();
            }
            Err(e) => {
                tracing::warn!(%e, "send failed");
                // Roll back and hand the text back to the composer.
                if let Some(entry) = removed {
                    self.state.compose_draft = Some(entry.body);
                    self.emit_compose_draft();
                }
                self.toast(format!("Message failed to send: {e}"));
                if self.open_key().as_ref() == Some(&key) {
                    self.refresh_current_thread();
                }
                self.refresh_chat_lists();
            }
        }
    }

    fn start_session(&mut self, viewer: Viewer) -> anyhow::Result<()> {
        use anyhow::Context;

        // Tear down any existing session first.
        self.stop_session();

        tracing::info!(user_id = %viewer.user_id, church_id = %viewer.church_id, "start_session");

        let groups = self
            .membership
            .user_groups(&viewer.user_id)
            .context("load group memberships")?;
        let group_ids: HashSet<String> = groups.into_iter().map(|g| g.group_id).collect();

        self.session_epoch += 1;
        let epoch = self.session_epoch;
        let subscription = self.subscribe_bus(&viewer.user_id, group_ids.clone(), epoch);

        self.session = Some(Session {
            viewer: viewer.clone(),
            epoch,
            subscription,
            poll_epoch: epoch,
            last_seq: None,
            group_ids,
        });

        self.state.session = SessionState::Active { viewer };
        self.state.router.screen_stack.clear();
        self.emit_session();
        self.emit_router();

        self.refresh_chat_lists();
        self.start_safety_poll(epoch);
        self.emit_full_state();
        Ok(())
    }

    fn stop_session(&mut self) {
        // Invalidate in-flight async results, forwarders, and poll loops.
        self.session_epoch += 1;
        self.poll_epoch.store(self.session_epoch, Ordering::SeqCst);

        if let Some(sess) = self.session.take() {
            // Synchronous: nothing is delivered for this subscription after
            // this line, so no callback can touch the discarded view state.
            self.bus.unsubscribe(&sess.subscription);
        }
        self.delivery_overrides.clear();
        self.local_outbox.clear();
        self.thread_last_stored_id = None;
        self.last_outgoing_ts = 0;
    }

    /// Subscribe to the bus and spawn the forwarder that turns bus events
    /// into internal actor messages. The forwarder dies when the
    /// subscription is dropped (receiver disconnects).
    fn subscribe_bus(
        &self,
        user_id: &str,
        group_ids: HashSet<String>,
        epoch: u64,
    ) -> crate::bus::Subscription {
        let filter = SubscriptionFilter::for_viewer(user_id, group_ids);
        let (subscription, rx) = self.bus.subscribe(filter);
        let tx = self.core_sender.clone();
        std_thread::spawn(move || {
            while let Ok(event) = rx.recv() {
                if tx
                    .send(CoreMsg::Internal(Box::new(InternalEvent::Realtime {
                        epoch,
                        event,
                    })))
                    .is_err()
                {
                    break;
                }
            }
        });
        subscription
    }

    /// Group membership changed since we subscribed: replace the bus
    /// subscription so new groups stream and left groups stop.
    fn resubscribe(&mut self, group_ids: HashSet<String>) {
        self.session_epoch += 1;
        let epoch = self.session_epoch;
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let user_id = sess.viewer.user_id.clone();
        let old = sess.subscription.clone();
        sess.epoch = epoch;
        sess.last_seq = None;
        sess.group_ids = group_ids.clone();
        self.bus.unsubscribe(&old);
        let subscription = self.subscribe_bus(&user_id, group_ids, epoch);
        if let Some(sess) = self.session.as_mut() {
            sess.subscription = subscription;
        }
    }

    fn start_safety_poll(&self, epoch: u64) {
        self.poll_epoch.store(epoch, Ordering::SeqCst);
        let Some(secs) = self.config.safety_poll_secs.filter(|s| *s > 0) else {
            return;
        };
        let tx = self.core_sender.clone();
        let live_epoch = self.poll_epoch.clone();
        self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(secs));
            interval.tick().await; // immediate first tick
            loop {
                interval.tick().await;
                if live_epoch.load(Ordering::SeqCst) != epoch {
                    break;
                }
                if tx
                    .send(CoreMsg::Internal(Box::new(InternalEvent::SafetyPoll {
                        epoch,
                    })))
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    fn target_exists(&self, viewer: &Viewer, target: &ChatTarget) -> bool {
        match target {
            ChatTarget::Direct { peer_id } => {
                matches!(self.membership.peer_profile(peer_id), Ok(Some(_)))
            }
            ChatTarget::Group { group_id } => matches!(
                self.membership.is_group_member(group_id, &viewer.user_id),
                Ok(true)
            ),
        }
    }

    fn open_thread(&mut self, viewer: &Viewer, target: ChatTarget) {
        let key = target.conversation_key(&viewer.user_id);
        self.thread_last_stored_id = None;
        self.state.current_thread = Some(ThreadViewState {
            title: self.thread_title(&target),
            target,
            messages: vec![],
        });
        self.refresh_current_thread();
        self.spawn_mark_read(key);
        // Open conversation renders as read in the lists right away.
        self.refresh_chat_lists();
    }

    fn thread_title(&self, target: &ChatTarget) -> String {
        match target {
            ChatTarget::Direct { peer_id } => self
                .membership
                .peer_profile(peer_id)
                .ok()
                .flatten()
                .map(|p| p.name)
                .unwrap_or_else(|| peer_id.clone()),
            ChatTarget::Group { group_id } => self
                .viewer()
                .and_then(|v| self.membership.user_groups(&v.user_id).ok())
                .and_then(|groups| groups.into_iter().find(|g| g.group_id == *group_id))
                .map(|g| g.name)
                .unwrap_or_else(|| group_id.clone()),
        }
    }

    fn sync_current_thread_to_router(&mut self) {
        let top = self.state.router.screen_stack.last().cloned();
        let target = match top {
            Some(Screen::DirectChat { peer_id }) => Some(ChatTarget::Direct { peer_id }),
            Some(Screen::GroupChat { group_id }) => Some(ChatTarget::Group { group_id }),
            _ => None,
        };
        match target {
            Some(target) => {
                let Some(viewer) = self.viewer() else {
                    return;
                };
                let already_open = self
                    .state
                    .current_thread
                    .as_ref()
                    .map(|t| t.target == target)
                    .unwrap_or(false);
                if !already_open {
                    self.open_thread(&viewer, target);
                }
            }
            None => {
                if self.state.current_thread.is_some() {
                    self.state.current_thread = None;
                    self.thread_last_stored_id = None;
                    self.emit_current_thread();
                    self.refresh_chat_lists();
                }
            }
        }
    }

    fn send_message(&mut self, target: ChatTarget, body: String) {
        let Some(viewer) = self.viewer() else {
            self.toast("No active session");
            return;
        };
        let body = body.trim().to_string();
        if body.is_empty() {
            return;
        }
        if self.state.compose_draft.is_some() {
            self.state.compose_draft = None;
            self.emit_compose_draft();
        }

        // Server timestamps are second-granularity; keep optimistic local
        // timestamps monotonic so rapid sends render in dispatch order.
        let ts = {
            let now = now_seconds();
            if now <= self.last_outgoing_ts {
                self.last_outgoing_ts += 1;
            } else {
                self.last_outgoing_ts = now;
            }
            self.last_outgoing_ts
        };

        let key = target.conversation_key(&viewer.user_id);
        let temp_id = format!("temp-{}", Uuid::new_v4());
        self.outbox_seq = self.outbox_seq.wrapping_add(1);
        self.local_outbox.entry(key.clone()).or_default().insert(
            temp_id.clone(),
            LocalOutgoing {
                body: body.clone(),
                timestamp: ts,
                seq: self.outbox_seq,
            },
        );
        self.delivery_overrides
            .entry(key.clone())
            .or_default()
            .insert(temp_id.clone(), MessageDeliveryState::Pending);

        // Optimistic render before the append resolves.
        if self.open_key().as_ref() == Some(&key) {
            self.refresh_current_thread();
        }
        self.refresh_chat_lists();

        let store = self.store.clone();
        let tx = self.core_sender.clone();
        let viewer_id = viewer.user_id.clone();
        self.runtime.spawn(async move {
            let result = match &target {
                ChatTarget::Direct { peer_id } => store
                    .append_direct(&viewer_id, peer_id, &body)
                    .map(RowInsert::Direct),
                ChatTarget::Group { group_id } => store
                    .append_group(group_id, &viewer_id, &body)
                    .map(RowInsert::Group),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::SendMessageResult {
                    target,
                    temp_id,
                    result,
                },
            )));
        });
    }

    fn mark_open_thread_read(&mut self) {
        if let Some(key) = self.open_key() {
            self.spawn_mark_read(key);
        }
    }

    fn spawn_mark_read(&self, key: ConversationKey) {
        let Some(viewer) = self.viewer() else {
            return;
        };
        let store = self.store.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            // Fire-and-forget: a failed mark_read never blocks rendering.
            if let Err(e) = store.mark_read(&key, &viewer.user_id) {
                tracing::warn!(%key, %e, "mark_read failed");
            }
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::MarkReadCompleted { key },
            )));
        });
    }

    fn refresh_all(&mut self) {
        self.refresh_chat_lists();
        if self.state.current_thread.is_some() {
            self.refresh_current_thread();
        }
    }

    fn refresh_chat_lists(&mut self) {
        let Some(viewer) = self.viewer() else {
            self.state.direct_chats = vec![];
            self.state.group_chats = vec![];
            self.emit_direct_chats();
            self.emit_group_chats();
            return;
        };
        let open_key = self.open_key();
        let now = now_seconds();

        let direct = aggregator::direct_chat_list(
            self.store.as_ref(),
            self.membership.as_ref(),
            &viewer,
            open_key.as_ref(),
            now,
        );
        let groups = aggregator::group_chat_list(
            self.store.as_ref(),
            self.membership.as_ref(),
            &viewer,
            open_key.as_ref(),
            self.config.avatar_preview_limit(),
            now,
        );

        // Reads fail soft: keep the previous lists on error.
        let (mut direct, mut groups) = match (direct, groups) {
            (Ok(d), Ok(g)) => (d, g),
            (d, g) => {
                let e = d.err().or(g.err()).map(|e| format!("{e:#}"));
                tracing::warn!(error = ?e, "chat list refresh failed");
                self.toast("Couldn't refresh conversations");
                return;
            }
        };

        self.apply_outbox_previews(&viewer.user_id, now, &mut direct, &mut groups);

        // Membership changed since subscribe: follow it on the bus.
        let group_ids: HashSet<String> = groups.iter().map(|g| g.group_id.clone()).collect();
        if self
            .session
            .as_ref()
            .is_some_and(|s| s.group_ids != group_ids)
        {
            tracing::info!("group memberships changed, resubscribing");
            self.resubscribe(group_ids);
        }

        self.state.direct_chats = direct;
        self.state.group_chats = groups;
        self.emit_direct_chats();
        self.emit_group_chats();
    }

    /// Let unconfirmed sends show up as list previews so the lists never lag
    /// behind the open thread.
    fn apply_outbox_previews(
        &self,
        viewer_id: &str,
        now: i64,
        direct: &mut [DirectChatSummary],
        groups: &mut [GroupChatSummary],
    ) {
        for (key, entries) in &self.local_outbox {
            let Some(newest) = entries.values().max_by_key(|lm| (lm.timestamp, lm.seq)) else {
                continue;
            };
            match key {
                ConversationKey::Direct { .. } => {
                    let Some(peer) = key.peer_of(viewer_id) else {
                        continue;
                    };
                    if let Some(c) = direct.iter_mut().find(|c| c.peer_id == peer) {
                        if c.last_message_at.unwrap_or(i64::MIN) < newest.timestamp {
                            c.last_message = Some(newest.body.clone());
                            c.last_message_at = Some(newest.timestamp);
                            c.last_message_age = Some(relative_age(now, newest.timestamp));
                        }
                    }
                }
                ConversationKey::Group { group_id } => {
                    if let Some(c) = groups.iter_mut().find(|c| &c.group_id == group_id) {
                        if c.last_message_at.unwrap_or(i64::MIN) < newest.timestamp {
                            c.last_message = Some(newest.body.clone());
                            c.last_message_at = Some(newest.timestamp);
                            c.last_message_age = Some(relative_age(now, newest.timestamp));
                        }
                    }
                }
            }
        }
        direct.sort_by(|a, b| {
            b.last_message_at
                .unwrap_or(0)
                .cmp(&a.last_message_at.unwrap_or(0))
                .then_with(|| a.peer_name.cmp(&b.peer_name))
        });
        groups.sort_by(|a, b| {
            b.last_message_at
                .unwrap_or(0)
                .cmp(&a.last_message_at.unwrap_or(0))
                .then_with(|| a.name.cmp(&b.name))
        });
    }

    /// Full rebuild of the open thread from storage plus the outbox.
    fn refresh_current_thread(&mut self) {
        let Some(viewer) = self.viewer() else {
            if self.state.current_thread.is_some() {
                self.state.current_thread = None;
                self.emit_current_thread();
            }
            return;
        };
        let Some(target) = self.state.current_thread.as_ref().map(|t| t.target.clone()) else {
            return;
        };
        let key = target.conversation_key(&viewer.user_id);

        let mut msgs = match self.load_thread_messages(&viewer, &target, None) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(%key, %e, "thread refresh failed");
                self.toast("Couldn't load messages");
                return;
            }
        };
        self.thread_last_stored_id = msgs.last().map(|m| m.id.clone());

        // Confirmed rows supersede their optimistic copies. Server ids do
        // not match temp ids, so the pairing is by body and timestamp.
        // Computed before truncation so a row outside the page window still
        // retires its twin.
        let covered = self
            .local_outbox
            .get(&key)
            .map(|outbox| thread::covered_by_storage(&msgs, outbox))
            .unwrap_or_default();
        for temp_id in covered {
            if let Some(outbox) = self.local_outbox.get_mut(&key) {
                outbox.remove(&temp_id);
            }
            if let Some(ovr) = self.delivery_overrides.get_mut(&key) {
                ovr.remove(&temp_id);
            }
        }
        thread::truncate_to_newest(&mut msgs, self.config.thread_page_size());

        let overrides = self.delivery_overrides.get(&key);
        if let Some(outbox) = self.local_outbox.get(&key) {
            thread::merge_outbox(&mut msgs, outbox, overrides, &viewer.user_id);
        }

        if let Some(t) = self.state.current_thread.as_mut() {
            t.messages = msgs;
        }
        self.emit_current_thread();
    }

    /// Incremental extension of the open thread after a realtime insert:
    /// fetch only rows after the last stored id. Falls back to a full
    /// rebuild when there is no usable cursor.
    fn extend_current_thread(&mut self) {
        let Some(since) = self.thread_last_stored_id.clone() else {
            self.refresh_current_thread();
            return;
        };
        let Some(viewer) = self.viewer() else {
            return;
        };
        let Some(target) = self.state.current_thread.as_ref().map(|t| t.target.clone()) else {
            return;
        };
        let key = target.conversation_key(&viewer.user_id);

        let new_msgs = match self.load_thread_messages(&viewer, &target, Some(&since)) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(%key, %e, "thread extend failed");
                return;
            }
        };
        if new_msgs.is_empty() {
            return;
        }
        self.thread_last_stored_id = new_msgs.last().map(|m| m.id.clone());

        let Some(t) = self.state.current_thread.as_mut() else {
            return;
        };
        // At-least-once delivery: drop rows the thread already shows.
        let present: HashSet<String> = t.messages.iter().map(|m| m.id.clone()).collect();
        for m in new_msgs {
            if present.contains(&m.id) {
                continue;
            }
            // The realtime echo of our own send can land before the append
            // result. Retire the optimistic twin in the same pass so no
            // emitted snapshot ever shows the message twice.
            if m.is_mine {
                if let Some(outbox) = self.local_outbox.get_mut(&key) {
                    if let Some(temp_id) = thread::matching_outbox_entry(outbox, &m) {
                        outbox.remove(&temp_id);
                        if let Some(ovr) = self.delivery_overrides.get_mut(&key) {
                            ovr.remove(&temp_id);
                        }
                        t.messages.retain(|tm| tm.id != temp_id);
                    }
                }
            }
            t.messages.push(m);
        }
        t.messages
            .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        let page = self.config.thread_page_size();
        if let Some(t) = self.state.current_thread.as_mut() {
            thread::truncate_to_newest(&mut t.messages, page);
        }
        self.emit_current_thread();
    }

    fn load_thread_messages(
        &self,
        viewer: &Viewer,
        target: &ChatTarget,
        since_id: Option<&str>,
    ) -> Result<Vec<crate::state::ThreadMessage>, shepherd_storage_traits::MessageError> {
        match target {
            ChatTarget::Direct { peer_id } => {
                let rows = self
                    .store
                    .direct_thread(&viewer.user_id, peer_id, since_id)?;
                Ok(rows
                    .iter()
                    .map(|m| thread::direct_to_thread_message(m, &viewer.user_id))
                    .collect())
            }
            ChatTarget::Group { group_id } => {
                let rows = self.store.group_thread(group_id, since_id)?;
                let mut names: HashMap<String, String> = HashMap::new();
                for m in &rows {
                    if !names.contains_key(&m.sender_id) {
                        if let Ok(Some(p)) = self.membership.peer_profile(&m.sender_id) {
                            names.insert(m.sender_id.clone(), p.name);
                        }
                    }
                }
                Ok(rows
                    .iter()
                    .map(|m| thread::group_to_thread_message(m, &viewer.user_id, &names))
                    .collect())
            }
        }
    }
}
