/// Roles and factions.
pub mod roles;
mod sse;
/// Phase transition table.
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tracing::warn;

use crate::{
    config::AppConfig,
    dao::session_store::SessionStore,
    error::ServiceError,
    services::{
        code_allocator::CodePool,
        notifier::{Notifier, SessionNotification},
    },
};

pub use self::sse::SseHub;

/// State shared by every handler and background task.
pub type SharedState = Arc<AppState>;

/// Capacity of the broadcast channel behind the SSE hub.
pub const SSE_CAPACITY: usize = 64;

/// Central application state: storage handle, notification collaborator, code pool and
/// configuration. Session data itself lives in the store.
pub struct AppState {
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    degraded: watch::Sender<bool>,
    sse: Arc<SseHub>,
    notifier: Arc<dyn Notifier>,
    codes: CodePool,
    config: AppConfig,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, sse: Arc<SseHub>, notifier: Arc<dyn Notifier>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            session_store: RwLock::new(None),
            degraded: degraded_tx,
            sse,
            notifier,
            codes: CodePool::new(),
            config,
        })
    }

    /// Build a state with `store` already installed, out of degraded mode.
    pub fn with_store(
        config: AppConfig,
        store: Arc<dyn SessionStore>,
        sse: Arc<SseHub>,
        notifier: Arc<dyn Notifier>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(false);
        Arc::new(Self {
            session_store: RwLock::new(Some(store)),
            degraded: degraded_tx,
            sse,
            notifier,
            codes: CodePool::new(),
            config,
        })
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// The installed store, or [`ServiceError::Degraded`] while storage is unavailable.
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store and leave degraded mode.
    pub async fn set_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Broadcast hub feeding the per-session SSE streams.
    pub fn sse(&self) -> &SseHub {
        &self.sse
    }

    /// Codes bound to sessions known by this process.
    pub fn codes(&self) -> &CodePool {
        &self.codes
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Hand a notification to the collaborator after the corresponding write landed.
    ///
    /// Delivery runs on its own task: a slow or failing transport is logged and dropped, it never
    /// delays or undoes the transition.
    pub fn notify(&self, code: &str, notification: SessionNotification) {
        let event = notification.name();
        let delivery = self.notifier.notify(code, &notification);
        let code = code.to_owned();
        tokio::spawn(async move {
            if let Err(err) = delivery.await {
                warn!(code = %code, event, error = %err, "failed to deliver session notification");
            }
        });
    }
}
