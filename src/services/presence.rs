//! Presence coordinator for join, leave and ping.
//!
//! DESIGN
//! ======
//! `NotJoined → Joined → NotJoined`, decided against the registry on every
//! call. Join dedups through `is_user_on_board`, so a reconnect storm or a
//! second tab produces no second USER_JOINED. Two racing joins may both see
//! "not joined"; the set-add is idempotent and the worst case is one extra
//! broadcast.
//!
//! ERROR HANDLING
//! ==============
//! `handle` turns every failure into a private reply on the caller's
//! `/queue/errors`. Only an anonymous caller, who has no private channel,
//! gets the error back for the socket driver to send as an ERROR frame.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::destination::{AppAction, BoardId, QUEUE_CONFIRMATIONS, QUEUE_ERRORS};
use crate::envelope::PrivateReply;
use crate::error::RealtimeError;
use crate::frame::ErrorCode;
use crate::services::access::BoardAccess;
use crate::services::auth::Identity;
use crate::services::fanout::Fanout;
use crate::services::session::SessionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { active_users: usize },
    AlreadyJoined { active_users: usize },
}

#[derive(Clone)]
pub struct PresenceCoordinator {
    registry: SessionRegistry,
    fanout: Fanout,
    access: Arc<dyn BoardAccess>,
}

impl PresenceCoordinator {
    #[must_use]
    pub fn new(registry: SessionRegistry, fanout: Fanout, access: Arc<dyn BoardAccess>) -> Self {
        Self { registry, fanout, access }
    }

    /// # Errors
    ///
    /// `AuthRequired` without identity (registry untouched), `AccessDenied`
    /// without board access, `StoreUnavailable` on store failure.
    pub async fn join(
        &self,
        session_id: &str,
        board_id: BoardId,
        identity: Option<&Identity>,
    ) -> Result<JoinOutcome, RealtimeError> {
        let identity = identity.ok_or(RealtimeError::AuthRequired)?;
        let username = identity.username.as_str();
        if !self.access.can_access(board_id, identity).await {
            warn!(%session_id, %board_id, %username, "presence: join denied");
            return Err(RealtimeError::AccessDenied(format!("you do not have access to board {board_id}")));
        }

        if self.registry.is_user_on_board(board_id, username).await? {
            let active_users = self.registry.board_users(board_id).await?.len();
            debug!(%session_id, %board_id, %username, "presence: already joined");
            return Ok(JoinOutcome::AlreadyJoined { active_users });
        }

        self.registry.add_user_to_board(board_id, username).await?;
        self.fanout.user_joined(board_id, identity.user_id, username).await;
        let active_users = self.registry.board_users(board_id).await?.len();
        info!(%session_id, %board_id, %username, active_users, "presence: user joined");
        Ok(JoinOutcome::Joined { active_users })
    }

    /// Returns whether a departure happened. Anonymous or non-member callers
    /// are a no-op.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` on store failure.
    pub async fn leave(
        &self,
        session_id: &str,
        board_id: BoardId,
        identity: Option<&Identity>,
    ) -> Result<bool, RealtimeError> {
        let Some(identity) = identity else {
            debug!(%session_id, %board_id, "presence: anonymous leave ignored");
            return Ok(false);
        };
        let username = identity.username.as_str();
        if !self.registry.is_user_on_board(board_id, username).await? {
            debug!(%session_id, %board_id, %username, "presence: leave without join ignored");
            return Ok(false);
        }

        self.registry.remove_user_from_board(board_id, username).await?;
        self.fanout.user_left(board_id, identity.user_id, username).await;
        info!(%session_id, %board_id, %username, "presence: user left");
        Ok(true)
    }

    /// # Errors
    ///
    /// `AuthRequired`, `AccessDenied` without access, `NotFound` when the
    /// caller has not joined, `StoreUnavailable` on store failure.
    pub async fn ping(&self, board_id: BoardId, identity: Option<&Identity>) -> Result<(), RealtimeError> {
        let identity = identity.ok_or(RealtimeError::AuthRequired)?;
        if !self.access.can_access(board_id, identity).await {
            return Err(RealtimeError::AccessDenied(format!("board {board_id}")));
        }
        if !self.registry.is_user_on_board(board_id, &identity.username).await? {
            return Err(RealtimeError::NotFound(format!("not connected to board {board_id}")));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// `StoreUnavailable` on store failure, never an empty set in its place.
    pub async fn active_users(&self, board_id: BoardId) -> Result<HashSet<String>, RealtimeError> {
        Ok(self.registry.board_users(board_id).await?)
    }

    /// Run one board command and answer the caller privately.
    ///
    /// # Errors
    ///
    /// Returns the failure only when the caller is anonymous.
    pub async fn handle(
        &self,
        session_id: &str,
        board_id: BoardId,
        action: AppAction,
        identity: Option<&Identity>,
    ) -> Result<(), RealtimeError> {
        let reply = match action {
            AppAction::Join => self.join(session_id, board_id, identity).await.map(|outcome| {
                Some(match outcome {
                    JoinOutcome::Joined { active_users } => {
                        PrivateReply::confirmation(board_id, format!("Connected to board {board_id}. Active users: {active_users}"))
                            .with_active_users(active_users)
                    }
                    JoinOutcome::AlreadyJoined { active_users } => {
                        PrivateReply::confirmation(board_id, format!("Already connected to board {board_id}"))
                            .with_active_users(active_users)
                    }
                })
            }),
            AppAction::Leave => self.leave(session_id, board_id, identity).await.map(|_| None),
            AppAction::Ping => self
                .ping(board_id, identity)
                .await
                .map(|()| Some(PrivateReply::confirmation(board_id, format!("pong from board {board_id}")))),
        };

        match (reply, identity) {
            (Ok(Some(reply)), Some(identity)) => {
                self.fanout.send_private(&identity.username, QUEUE_CONFIRMATIONS, &reply).await;
                Ok(())
            }
            (Ok(_), _) => Ok(()),
            (Err(e), Some(identity)) => {
                warn!(%session_id, %board_id, ?action, username = %identity.username, error = %e, "presence: command failed");
                let reply = PrivateReply::error(Some(board_id), e.error_code(), e.to_string());
                self.fanout.send_private(&identity.username, QUEUE_ERRORS, &reply).await;
                Ok(())
            }
            (Err(e), None) => Err(e),
        }
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
