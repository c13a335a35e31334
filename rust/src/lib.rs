//! Messaging core for the Shepherd volunteer-coordination app.
//!
//! All chat state lives here, behind a single-threaded actor. The embedding
//! UI dispatches [`AppAction`]s, receives [`AppUpdate`]s through an
//! [`AppReconciler`], and can resync from [`App::state`] at any time.
//! Storage and membership are trait objects so hosts can pick the in-memory
//! or sqlite backend, or bring their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

use shepherd_storage_traits::{MembershipIndex, MessageStorage};

pub mod actions;
pub mod bus;
mod core;
mod logging;
pub mod state;
pub mod updates;

pub use actions::AppAction;
pub use bus::RealtimeBus;
pub use state::AppState;
pub use updates::AppUpdate;

use updates::CoreMsg;

/// Callback surface the embedding UI implements to receive state updates.
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

pub struct App {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
}

impl App {
    /// Build the app and start its actor thread. `data_dir` is where config
    /// is read from; the `bus` must be the same instance registered as the
    /// store's realtime sink.
    pub fn new(
        data_dir: String,
        store: Arc<dyn MessageStorage>,
        membership: Arc<dyn MembershipIndex>,
        bus: Arc<RealtimeBus>,
    ) -> Arc<Self> {
        logging::init_logging();
        tracing::info!(%data_dir, "Initializing app");

        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let (update_tx, update_rx) = flume::unbounded::<AppUpdate>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));

        let app = Arc::new(Self {
            core_tx: core_tx.clone(),
            update_rx,
            listening: AtomicBool::new(false),
            shared_state: shared_state.clone(),
        });

        thread::spawn(move || {
            let mut core = core::AppCore::new(
                update_tx,
                core_tx,
                data_dir,
                shared_state,
                store,
                membership,
                bus,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
            tracing::info!("core thread exiting");
        });

        app
    }

    /// Snapshot of the current state. Always available, even before the
    /// first update is delivered.
    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    /// Queue an action for the actor. Never blocks.
    pub fn dispatch(&self, action: AppAction) {
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    /// Start forwarding updates to `reconciler` on a dedicated thread.
    /// Single consumer: the second and later calls are rejected.
    pub fn listen_for_updates(&self, reconciler: Arc<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("listen_for_updates called twice, ignoring");
            return;
        }
        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
            tracing::info!("update listener exiting");
        });
    }
}
