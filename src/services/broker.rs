//! In-process broker routing destinations to live subscribers.
//!
//! DESIGN
//! ======
//! Each connection owns one outbound `mpsc` channel. A subscription maps a
//! routing key (board topic or resolved `/user/<name>/queue/<q>`) to that
//! channel under the (session, subscription id) pair. Publishing walks the
//! subscribers of one key and `try_send`s a MESSAGE frame to each, so a slow
//! client never stalls the publisher and per-connection order is the
//! channel's FIFO order.
//!
//! The broker is routing only. Who may subscribe to what is decided by the
//! authorizer before `subscribe` is called.

use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::frame::Frame;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubscriptionKey {
    session_id: String,
    subscription_id: String,
}

struct Subscriber {
    /// Destination as the client spelled it; echoed on MESSAGE frames.
    client_destination: String,
    tx: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct Routes {
    by_destination: HashMap<String, HashMap<SubscriptionKey, Subscriber>>,
    /// session → subscription id → routing key.
    by_session: HashMap<String, HashMap<String, String>>,
}

impl Routes {
    fn detach(&mut self, key: &SubscriptionKey, routing_key: &str) {
        if let Some(subs) = self.by_destination.get_mut(routing_key) {
            subs.remove(key);
            if subs.is_empty() {
                self.by_destination.remove(routing_key);
            }
        }
    }
}

#[derive(Default)]
pub struct Broker {
    routes: RwLock<Routes>,
}

impl Broker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a subscription. Reusing a subscription id replaces the old one.
    pub async fn subscribe(
        &self,
        session_id: &str,
        subscription_id: &str,
        routing_key: &str,
        client_destination: &str,
        tx: mpsc::Sender<Frame>,
    ) {
        let key = SubscriptionKey { session_id: session_id.to_owned(), subscription_id: subscription_id.to_owned() };
        let mut routes = self.routes.write().await;
        let previous = routes
            .by_session
            .entry(session_id.to_owned())
            .or_default()
            .insert(subscription_id.to_owned(), routing_key.to_owned());
        if let Some(previous) = previous {
            routes.detach(&key, &previous);
        }
        routes
            .by_destination
            .entry(routing_key.to_owned())
            .or_default()
            .insert(key, Subscriber { client_destination: client_destination.to_owned(), tx });
        debug!(%session_id, %subscription_id, %routing_key, "broker: subscribed");
    }

    /// Detach one subscription. Returns its routing key if it existed.
    pub async fn unsubscribe(&self, session_id: &str, subscription_id: &str) -> Option<String> {
        let mut routes = self.routes.write().await;
        let session = routes.by_session.get_mut(session_id)?;
        let routing_key = session.remove(subscription_id)?;
        if session.is_empty() {
            routes.by_session.remove(session_id);
        }
        let key = SubscriptionKey { session_id: session_id.to_owned(), subscription_id: subscription_id.to_owned() };
        routes.detach(&key, &routing_key);
        debug!(%session_id, %subscription_id, %routing_key, "broker: unsubscribed");
        Some(routing_key)
    }

    /// Detach every subscription a session holds. Returns how many.
    pub async fn drop_session(&self, session_id: &str) -> usize {
        let mut routes = self.routes.write().await;
        let Some(session) = routes.by_session.remove(session_id) else {
            return 0;
        };
        for (subscription_id, routing_key) in &session {
            let key = SubscriptionKey { session_id: session_id.to_owned(), subscription_id: subscription_id.clone() };
            routes.detach(&key, routing_key);
        }
        session.len()
    }

    /// Deliver `body` to every subscriber of `routing_key`. Returns the
    /// number of subscribers the frame was handed to.
    pub async fn publish(&self, routing_key: &str, body: &serde_json::Value) -> usize {
        let routes = self.routes.read().await;
        let Some(subs) = routes.by_destination.get(routing_key) else {
            return 0;
        };
        let mut delivered = 0;
        for (key, sub) in subs {
            let frame = Frame::message(sub.client_destination.as_str(), key.subscription_id.as_str(), body.clone());
            match sub.tx.try_send(frame) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(session_id = %key.session_id, %routing_key, error = %e, "broker: dropped frame for subscriber");
                }
            }
        }
        delivered
    }

    pub async fn subscriber_count(&self, routing_key: &str) -> usize {
        self.routes.read().await.by_destination.get(routing_key).map_or(0, HashMap::len)
    }

    pub async fn is_subscribed(&self, session_id: &str, subscription_id: &str) -> bool {
        self.routes
            .read()
            .await
            .by_session
            .get(session_id)
            .is_some_and(|subs| subs.contains_key(subscription_id))
    }
}

#[cfg(test)]
#[path = "broker_test.rs"]
mod tests;
