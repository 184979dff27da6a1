//! Lifecycle listener turning transport signals into registry state.
//!
//! ARCHITECTURE
//! ============
//! Socket drivers publish `LifecycleEvent`s onto a `LifecycleBus`. One
//! dispatcher task drains the bus and runs each event on its own task,
//! with at most `workers` running at once. Connect and disconnect carry a
//! oneshot so the driver learns the outcome without blocking the pump.
//!
//! Disconnect cleanup does not depend on the client having sent leave:
//! every board in the user's inverse index is cleared and announced.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::RealtimeError;
use crate::services::auth::Identity;
use crate::services::fanout::Fanout;
use crate::services::session::SessionRegistry;
use crate::store::StoreError;

const BUS_CAPACITY: usize = 1024;

#[derive(Debug)]
pub enum LifecycleEvent {
    Connect {
        session_id: String,
        identity: Option<Identity>,
        ack: oneshot::Sender<Result<(), RealtimeError>>,
    },
    Disconnect {
        session_id: String,
        /// Number of boards cleaned up.
        ack: Option<oneshot::Sender<usize>>,
    },
    Subscribe {
        session_id: String,
        destination: String,
    },
    Unsubscribe {
        session_id: String,
        subscription_id: String,
    },
}

// =============================================================================
// LISTENER
// =============================================================================

#[derive(Clone)]
pub struct LifecycleListener {
    registry: SessionRegistry,
    fanout: Fanout,
}

impl LifecycleListener {
    #[must_use]
    pub fn new(registry: SessionRegistry, fanout: Fanout) -> Self {
        Self { registry, fanout }
    }

    pub async fn handle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Connect { session_id, identity, ack } => {
                let result = self.on_connect(&session_id, identity.as_ref()).await;
                let _ = ack.send(result.map_err(RealtimeError::from));
            }
            LifecycleEvent::Disconnect { session_id, ack } => {
                let cleaned = self.on_disconnect(&session_id).await;
                if let Some(ack) = ack {
                    let _ = ack.send(cleaned);
                }
            }
            LifecycleEvent::Subscribe { session_id, destination } => {
                debug!(%session_id, %destination, "lifecycle: subscribe observed");
            }
            LifecycleEvent::Unsubscribe { session_id, subscription_id } => {
                debug!(%session_id, %subscription_id, "lifecycle: unsubscribe observed");
            }
        }
    }

    /// Register an authenticated session. Anonymous connects are logged and
    /// not tracked.
    ///
    /// # Errors
    ///
    /// Store failures propagate; the connection must not proceed.
    pub async fn on_connect(&self, session_id: &str, identity: Option<&Identity>) -> Result<(), StoreError> {
        let Some(identity) = identity else {
            info!(%session_id, "lifecycle: anonymous connection");
            return Ok(());
        };
        self.registry.register(session_id, &identity.username).await?;
        info!(%session_id, username = %identity.username, "lifecycle: connected");
        Ok(())
    }

    /// Clear every board the session's user is on, announce each departure,
    /// then forget the session. Returns the number of boards announced.
    pub async fn on_disconnect(&self, session_id: &str) -> usize {
        let username = match self.registry.resolve_user(session_id).await {
            Ok(Some(username)) => username,
            Ok(None) => {
                debug!(%session_id, "lifecycle: untracked session disconnected");
                return 0;
            }
            Err(e) => {
                error!(%session_id, error = %e, "lifecycle: cannot resolve disconnecting session, leaving to ttl");
                return 0;
            }
        };

        let boards = match self.registry.user_boards(&username).await {
            Ok(boards) => boards,
            Err(e) => {
                error!(%session_id, %username, error = %e, "lifecycle: cannot list boards, leaving to ttl");
                Default::default()
            }
        };

        let mut cleaned = 0;
        for board_id in boards {
            if let Err(e) = self.registry.remove_user_from_board(board_id, &username).await {
                warn!(%session_id, %board_id, %username, error = %e, "lifecycle: presence left to ttl");
                continue;
            }
            self.fanout.user_disconnected(board_id, &username).await;
            cleaned += 1;
        }

        if let Err(e) = self.registry.unregister(session_id).await {
            warn!(%session_id, error = %e, "lifecycle: session left to ttl");
        }
        info!(%session_id, %username, boards = cleaned, "lifecycle: disconnected");
        cleaned
    }
}

// =============================================================================
// BUS
// =============================================================================

#[derive(Clone)]
pub struct LifecycleBus {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl LifecycleBus {
    /// Start the dispatcher. It exits once every bus handle is dropped.
    #[must_use]
    pub fn spawn(listener: LifecycleListener, workers: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<LifecycleEvent>(BUS_CAPACITY);
        let permits = Arc::new(Semaphore::new(workers.max(1)));
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let listener = listener.clone();
                tokio::spawn(async move {
                    listener.handle(event).await;
                    drop(permit);
                });
            }
            debug!("lifecycle: bus closed");
        });
        (Self { tx }, handle)
    }

    /// Register a session and wait for the outcome.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if registration failed or the bus is gone.
    pub async fn connect(&self, session_id: &str, identity: Option<Identity>) -> Result<(), RealtimeError> {
        let (ack, done) = oneshot::channel();
        let event = LifecycleEvent::Connect { session_id: session_id.to_owned(), identity, ack };
        if self.tx.send(event).await.is_err() {
            return Err(bus_closed());
        }
        done.await.unwrap_or_else(|_| Err(bus_closed()))
    }

    /// Run disconnect cleanup and wait for it. Returns boards cleaned.
    pub async fn disconnect(&self, session_id: &str) -> usize {
        let (ack, done) = oneshot::channel();
        let event = LifecycleEvent::Disconnect { session_id: session_id.to_owned(), ack: Some(ack) };
        if self.tx.send(event).await.is_err() {
            warn!(%session_id, "lifecycle: bus closed, presence left to ttl");
            return 0;
        }
        done.await.unwrap_or(0)
    }

    /// Fire-and-forget delivery for diagnostic events.
    pub fn observe(&self, event: LifecycleEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!(error = %e, "lifecycle: diagnostic event dropped");
        }
    }
}

fn bus_closed() -> RealtimeError {
    RealtimeError::StoreUnavailable(StoreError::Unavailable("lifecycle bus closed".into()))
}

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod tests;
