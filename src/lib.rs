//! Conversation synchronization and identity resolution engine.
//!
//! Keeps an in-memory view of group channels and one-to-one conversations
//! consistent with a remote, push-notifying store, and reconciles two
//! identity spaces (registered accounts and unregistered contact records)
//! into a single addressable conversation target.
//!
//! All engine work happens on a single actor thread: callers enqueue
//! [`Action`]s through [`Engine::dispatch`] and observe results as full
//! [`EngineState`] snapshots, either polled via [`Engine::state`] or
//! streamed through [`Engine::listen_for_updates`].

mod actions;
mod core;
mod logging;
mod services;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::{Action, CounterpartRef};
pub use services::{
    ChannelApi, ContactApi, DirectApi, DirectoryApi, PushApi, PushFilter, PushHandle,
    ServiceError, Services,
};
pub use state::*;
pub use updates::Update;

use updates::CoreMsg;

pub trait UpdateReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: Update);
}

pub struct Engine {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<Update>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<EngineState>>,
}

impl Engine {
    pub fn new(services: Services, data_dir: impl Into<String>) -> Arc<Self> {
        logging::init_logging();
        let data_dir = data_dir.into();
        tracing::info!(data_dir = %data_dir, "Engine::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(EngineState::empty()));

        // Actor loop thread (single threaded engine actor).
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        thread::spawn(move || {
            let mut core = core::EngineCore::new(
                update_tx,
                core_tx_for_core,
                services,
                data_dir,
                shared_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
        })
    }

    /// Latest committed snapshot.
    pub fn state(&self) -> EngineState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    /// Contract: never block the caller.
    pub fn dispatch(&self, action: Action) {
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn UpdateReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}
