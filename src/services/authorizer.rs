//! Subscription authorizer guarding CONNECT and SUBSCRIBE.
//!
//! DESIGN
//! ======
//! - CONNECT never fails the transport. A missing, malformed, expired or
//!   forged bearer leaves the connection anonymous; privileged actions are
//!   denied later.
//! - SUBSCRIBE to a board topic requires a bound identity and a positive
//!   `can_access` answer, checked once per subscription attempt.
//! - Private queues require a bound identity and are always resolved to
//!   the subscriber's own username, so a client cannot name another user's
//!   queue.
//!
//! Rejections carry a generic message only; the reason is logged here.

use std::sync::Arc;
use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::destination::{self, BoardId, Destination};
use crate::error::RealtimeError;
use crate::frame::Frame;
use crate::services::access::BoardAccess;
use crate::services::auth::{Identity, TokenVerifier};

const REJECTED: &str = "subscription rejected";

// =============================================================================
// CONNECTION CONTEXT
// =============================================================================

/// Per-connection state. The identity slot is written by the first CONNECT
/// and read-only afterwards; `None` inside the slot means anonymous.
#[derive(Debug)]
pub struct ConnectionContext {
    session_id: String,
    identity: OnceLock<Option<Identity>>,
}

impl ConnectionContext {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), identity: OnceLock::new() }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Bind the outcome of CONNECT. Returns `false` if already bound.
    pub fn bind(&self, identity: Option<Identity>) -> bool {
        self.identity.set(identity).is_ok()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.identity.get().is_some()
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get().and_then(Option::as_ref)
    }
}

// =============================================================================
// AUTHORIZER
// =============================================================================

/// Where an accepted subscription is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRoute {
    pub routing_key: String,
    pub target: Destination,
}

impl SubscriptionRoute {
    #[must_use]
    pub fn board_id(&self) -> Option<BoardId> {
        match self.target {
            Destination::BoardTopic(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionAuthorizer {
    verifier: TokenVerifier,
    access: Arc<dyn BoardAccess>,
}

impl SubscriptionAuthorizer {
    #[must_use]
    pub fn new(verifier: TokenVerifier, access: Arc<dyn BoardAccess>) -> Self {
        Self { verifier, access }
    }

    /// Resolve the identity carried by a CONNECT frame, if any.
    #[must_use]
    pub fn authenticate(&self, session_id: &str, frame: &Frame) -> Option<Identity> {
        let Some(token) = frame.bearer_token() else {
            debug!(%session_id, "authorizer: connect without bearer, anonymous");
            return None;
        };
        match self.verifier.verify(token) {
            Ok(identity) => {
                debug!(%session_id, username = %identity.username, "authorizer: credential accepted");
                Some(identity)
            }
            Err(e) => {
                warn!(%session_id, error = %e, "authorizer: credential rejected, anonymous");
                None
            }
        }
    }

    /// Decide a SUBSCRIBE.
    ///
    /// # Errors
    ///
    /// `AuthRequired` for anonymous subscribers to private queues;
    /// `AccessDenied` for malformed destinations, anonymous board
    /// subscribers and denied boards.
    pub async fn authorize_subscribe(
        &self,
        session_id: &str,
        identity: Option<&Identity>,
        destination: &str,
    ) -> Result<SubscriptionRoute, RealtimeError> {
        let target = destination::classify(destination).map_err(|e| {
            warn!(%session_id, %destination, error = %e, "authorizer: malformed destination");
            RealtimeError::AccessDenied(REJECTED.into())
        })?;

        match &target {
            Destination::BoardTopic(board_id) => {
                let Some(identity) = identity else {
                    warn!(%session_id, %board_id, "authorizer: anonymous board subscription");
                    return Err(RealtimeError::AccessDenied(REJECTED.into()));
                };
                if !self.access.can_access(*board_id, identity).await {
                    warn!(%session_id, %board_id, username = %identity.username, "authorizer: board access denied");
                    return Err(RealtimeError::AccessDenied(REJECTED.into()));
                }
                Ok(SubscriptionRoute { routing_key: destination::board_topic(*board_id), target })
            }
            Destination::UserQueue(queue) => {
                let Some(identity) = identity else {
                    warn!(%session_id, %queue, "authorizer: anonymous private subscription");
                    return Err(RealtimeError::AuthRequired);
                };
                let routing_key = destination::user_destination(&identity.username, queue);
                Ok(SubscriptionRoute { routing_key, target })
            }
            // Resolved private paths are never subscribable by name.
            Destination::Other(raw) if raw.starts_with(destination::USER_PREFIX) => {
                warn!(%session_id, %destination, "authorizer: direct private destination");
                Err(RealtimeError::AccessDenied(REJECTED.into()))
            }
            Destination::Other(raw) => Ok(SubscriptionRoute { routing_key: raw.clone(), target }),
        }
    }
}

#[cfg(test)]
#[path = "authorizer_test.rs"]
mod tests;
