use std::sync::Arc;

use boardcast::config::AppConfig;
use boardcast::routes;
use boardcast::services::access::{BoardAccess, HttpBoardAccess, MembershipTable};
use boardcast::services::auth::TokenVerifier;
use boardcast::services::notify::{ChannelNotificationQueue, NotificationQueue, RedisNotificationQueue};
use boardcast::state::{AppState, Collaborators};
use boardcast::store::memory::spawn_sweeper;
use boardcast::store::{MemoryStore, PresenceStore, RedisStore};
use tracing_subscriber::EnvFilter;

const NOTIFICATION_BUFFER: usize = 1024;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("boardcast=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env().expect("invalid configuration");

    let (store, queue): (Arc<dyn PresenceStore>, Arc<dyn NotificationQueue>) = match &config.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url, config.store_timeout)
                .await
                .expect("redis presence store unavailable");
            let queue = RedisNotificationQueue::connect(url, &config.notification_queue_key, config.store_timeout)
                .await
                .expect("redis notification queue unavailable");
            tracing::info!("presence: redis");
            let store: Arc<dyn PresenceStore> = Arc::new(store);
            let queue: Arc<dyn NotificationQueue> = Arc::new(queue);
            (store, queue)
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            let _sweeper = spawn_sweeper(store.clone(), config.memory_sweep);
            let (queue, _consumer) = ChannelNotificationQueue::spawn(NOTIFICATION_BUFFER);
            tracing::warn!("presence: in-process store, not shared across instances");
            let queue: Arc<dyn NotificationQueue> = Arc::new(queue);
            (store as Arc<dyn PresenceStore>, queue)
        }
    };

    let access: Arc<dyn BoardAccess> = match (&config.board_access_url, &config.board_acl_file) {
        (Some(url), _) => {
            Arc::new(HttpBoardAccess::new(url, config.store_timeout).expect("board access client init failed"))
        }
        (None, Some(path)) => Arc::new(MembershipTable::load(path).expect("board acl file unreadable")),
        (None, None) => {
            tracing::warn!("access: no board access source configured, only admins may subscribe");
            Arc::new(MembershipTable::new())
        }
    };

    let (state, _dispatcher) = AppState::new(Collaborators {
        store,
        access,
        queue,
        verifier: TokenVerifier::new(&config.jwt_secret),
        session_ttl: config.session_ttl,
        lifecycle_workers: config.lifecycle_workers,
    });

    let app = routes::app(state);
    let port = config.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "boardcast listening");
    axum::serve(listener, app).await.expect("server failed");
}
