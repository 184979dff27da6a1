//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! Every field is a cheap clone over shared handles: the presence store sits
//! behind the session registry, and the in-process broker routes frames to
//! live connections. No field holds presence authority of its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::services::access::BoardAccess;
use crate::services::auth::TokenVerifier;
use crate::services::authorizer::SubscriptionAuthorizer;
use crate::services::broker::Broker;
use crate::services::fanout::Fanout;
use crate::services::lifecycle::{LifecycleBus, LifecycleListener};
use crate::services::notify::NotificationQueue;
use crate::services::presence::PresenceCoordinator;
use crate::services::session::SessionRegistry;
use crate::store::PresenceStore;

/// Collaborators an `AppState` is assembled from.
pub struct Collaborators {
    pub store: Arc<dyn PresenceStore>,
    pub access: Arc<dyn BoardAccess>,
    pub queue: Arc<dyn NotificationQueue>,
    pub verifier: TokenVerifier,
    pub session_ttl: Duration,
    pub lifecycle_workers: usize,
}

/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub broker: Arc<Broker>,
    pub fanout: Fanout,
    pub verifier: TokenVerifier,
    pub authorizer: SubscriptionAuthorizer,
    pub presence: PresenceCoordinator,
    pub lifecycle: LifecycleBus,
}

impl AppState {
    /// Wire services together and start the lifecycle dispatcher.
    #[must_use]
    pub fn new(parts: Collaborators) -> (Self, JoinHandle<()>) {
        let registry = SessionRegistry::new(parts.store, parts.session_ttl);
        let broker = Arc::new(Broker::new());
        let fanout = Fanout::new(broker.clone(), parts.queue);
        let authorizer = SubscriptionAuthorizer::new(parts.verifier.clone(), parts.access.clone());
        let presence = PresenceCoordinator::new(registry.clone(), fanout.clone(), parts.access);
        let listener = LifecycleListener::new(registry.clone(), fanout.clone());
        let (lifecycle, dispatcher) = LifecycleBus::spawn(listener, parts.lifecycle_workers);

        let state = Self { registry, broker, fanout, verifier: parts.verifier, authorizer, presence, lifecycle };
        (state, dispatcher)
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::destination::{BoardId, board_topic};
    use crate::frame::Frame;
    use crate::services::access::{BoardRole, MembershipTable};
    use crate::services::auth::Identity;
    use crate::services::notify::{AssignmentNotice, QueueError};
    use crate::services::session::DEFAULT_SESSION_TTL;
    use crate::store::MemoryStore;

    pub const TEST_SECRET: &str = "test-secret";

    /// Notification queue that keeps every notice for assertions.
    #[derive(Default)]
    pub struct RecordingQueue {
        notices: Mutex<Vec<AssignmentNotice>>,
    }

    impl RecordingQueue {
        pub fn notices(&self) -> Vec<AssignmentNotice> {
            self.notices.lock().expect("recording queue mutex should lock").clone()
        }
    }

    #[async_trait]
    impl NotificationQueue for RecordingQueue {
        async fn enqueue(&self, notice: AssignmentNotice) -> Result<(), QueueError> {
            self.notices.lock().expect("recording queue mutex should lock").push(notice);
            Ok(())
        }
    }

    /// Test state plus direct handles on its in-memory collaborators.
    pub struct TestApp {
        pub state: AppState,
        pub store: Arc<MemoryStore>,
        pub acl: Arc<MembershipTable>,
        pub queue: Arc<RecordingQueue>,
    }

    #[must_use]
    pub fn test_app() -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let acl = Arc::new(MembershipTable::new());
        let queue = Arc::new(RecordingQueue::default());
        let (state, _dispatcher) = AppState::new(Collaborators {
            store: store.clone(),
            access: acl.clone(),
            queue: queue.clone(),
            verifier: TokenVerifier::new(TEST_SECRET),
            session_ttl: DEFAULT_SESSION_TTL,
            lifecycle_workers: 4,
        });
        TestApp { state, store, acl, queue }
    }

    #[must_use]
    pub fn test_app_state() -> AppState {
        test_app().state
    }

    #[must_use]
    pub fn identity(username: &str) -> Identity {
        Identity::new(i64::try_from(username.len()).ok(), username, vec!["USER".into()])
    }

    #[must_use]
    pub fn admin(username: &str) -> Identity {
        Identity::new(Some(1), username, vec!["ADMIN".into()])
    }

    #[must_use]
    pub fn token_for(identity: &Identity) -> String {
        TokenVerifier::new(TEST_SECRET).mint(identity, 3600).expect("mint should succeed")
    }

    /// Grant `username` viewer access on every board listed.
    pub async fn grant(app: &TestApp, username: &str, boards: &[u64]) {
        for board in boards {
            app.acl.grant(BoardId(*board), username, BoardRole::Viewer).await;
        }
    }

    /// Attach a raw board-topic subscriber and return its receiver.
    pub async fn watch_board(state: &AppState, session_id: &str, board_id: BoardId) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(64);
        let topic = board_topic(board_id);
        state.broker.subscribe(session_id, "watch", &topic, &topic, tx).await;
        rx
    }

    /// Attach a raw private-queue subscriber for `username`.
    pub async fn watch_queue(state: &AppState, username: &str, queue: &str) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(64);
        let routing_key = crate::destination::user_destination(username, queue);
        let client_destination = format!("/user{queue}");
        state.broker.subscribe(&format!("watch-{username}{queue}"), "watch", &routing_key, &client_destination, tx).await;
        rx
    }

    pub async fn recv_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
        timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("frame receive timed out")
            .expect("frame channel closed unexpectedly")
    }

    /// Body of the next MESSAGE frame.
    pub async fn recv_body(rx: &mut mpsc::Receiver<Frame>) -> serde_json::Value {
        recv_frame(rx).await.body.expect("message frame should carry a body")
    }

    pub async fn assert_no_frame(rx: &mut mpsc::Receiver<Frame>) {
        assert!(timeout(Duration::from_millis(80), rx.recv()).await.is_err(), "expected no frame");
    }

    /// Everything queued right now, without waiting.
    pub fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}
