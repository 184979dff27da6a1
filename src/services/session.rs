//! Session registry over the shared presence store.
//!
//! ARCHITECTURE
//! ============
//! Three key families, all carrying the session TTL:
//! - `ws:session:<session_id>` → username
//! - `ws:board:<board_id>` → set of usernames (BoardPresence)
//! - `ws:user:boards:<username>` → set of board ids (UserBoards)
//!
//! INVARIANTS
//! ==========
//! A user is in `ws:board:B` iff `B` is in `ws:user:boards:U`. Both indices
//! change in one atomic store batch, board set first, then inverse index, so
//! a store without cross-key atomicity can only ever over-report presence.
//!
//! TRADE-OFFS
//! ==========
//! Cleanup after an ungraceful disconnect relies on expiry, not on the
//! disconnect handler running. A crashed handler leaves a user "online" for
//! at most one TTL window.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::destination::BoardId;
use crate::store::{PresenceStore, SetOp, StoreError};

const SESSION_PREFIX: &str = "ws:session:";
const BOARD_USERS_PREFIX: &str = "ws:board:";
const USER_BOARDS_PREFIX: &str = "ws:user:boards:";

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 3600);

fn session_key(session_id: &str) -> String {
    format!("{SESSION_PREFIX}{session_id}")
}

fn board_key(board_id: BoardId) -> String {
    format!("{BOARD_USERS_PREFIX}{board_id}")
}

fn user_boards_key(username: &str) -> String {
    format!("{USER_BOARDS_PREFIX}{username}")
}

#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn PresenceStore>,
    ttl: Duration,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn PresenceStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Bind a session to a user. Last write wins.
    ///
    /// # Errors
    ///
    /// Store failures propagate; the connection attempt must not proceed
    /// half-registered.
    pub async fn register(&self, session_id: &str, username: &str) -> Result<(), StoreError> {
        self.store
            .put(&session_key(session_id), username, self.ttl)
            .await
            .inspect_err(|e| error!(%session_id, error = %e, "registry: failed to register session"))?;
        debug!(%session_id, %username, "registry: session registered");
        Ok(())
    }

    /// Resolve a session to its user. Absence is a normal outcome.
    ///
    /// # Errors
    ///
    /// Store failures propagate so callers never mistake them for absence.
    pub async fn resolve_user(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        let key = session_key(session_id);
        let username = self.store.get(&key).await?;
        if username.is_some() {
            self.refresh(&key).await;
        }
        Ok(username)
    }

    /// Forget a session. Idempotent.
    ///
    /// # Errors
    ///
    /// Store failures propagate; expiry eventually removes the key anyway.
    pub async fn unregister(&self, session_id: &str) -> Result<(), StoreError> {
        self.store.delete(&session_key(session_id)).await?;
        debug!(%session_id, "registry: session unregistered");
        Ok(())
    }

    /// Mark `username` present on `board_id`, updating both indices together.
    ///
    /// # Errors
    ///
    /// On store failure neither index is assumed updated.
    pub async fn add_user_to_board(&self, board_id: BoardId, username: &str) -> Result<(), StoreError> {
        let board = board_key(board_id);
        let user = user_boards_key(username);
        let ops = [
            SetOp::Add { key: board.clone(), member: username.to_owned() },
            SetOp::Add { key: user.clone(), member: board_id.to_string() },
            SetOp::Expire { key: board, ttl: self.ttl },
            SetOp::Expire { key: user, ttl: self.ttl },
        ];
        self.store
            .apply(&ops)
            .await
            .inspect_err(|e| error!(%board_id, %username, error = %e, "registry: failed to add user to board"))?;
        debug!(%board_id, %username, "registry: user added to board");
        Ok(())
    }

    /// Remove `username` from `board_id`, updating both indices together.
    ///
    /// # Errors
    ///
    /// On store failure neither index is assumed updated.
    pub async fn remove_user_from_board(&self, board_id: BoardId, username: &str) -> Result<(), StoreError> {
        let board = board_key(board_id);
        let user = user_boards_key(username);
        let ops = [
            SetOp::Remove { key: board.clone(), member: username.to_owned() },
            SetOp::Remove { key: user.clone(), member: board_id.to_string() },
            SetOp::Expire { key: board, ttl: self.ttl },
            SetOp::Expire { key: user, ttl: self.ttl },
        ];
        self.store
            .apply(&ops)
            .await
            .inspect_err(|e| error!(%board_id, %username, error = %e, "registry: failed to remove user from board"))?;
        debug!(%board_id, %username, "registry: user removed from board");
        Ok(())
    }

    /// Usernames present on a board; empty on miss.
    ///
    /// # Errors
    ///
    /// Store failures propagate.
    pub async fn board_users(&self, board_id: BoardId) -> Result<HashSet<String>, StoreError> {
        let key = board_key(board_id);
        let users = self.store.members(&key).await?;
        if !users.is_empty() {
            self.refresh(&key).await;
        }
        Ok(users)
    }

    /// Boards a user is present on; empty on miss. Unparseable members are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Store failures propagate.
    pub async fn user_boards(&self, username: &str) -> Result<HashSet<BoardId>, StoreError> {
        let key = user_boards_key(username);
        let raw = self.store.members(&key).await?;
        if !raw.is_empty() {
            self.refresh(&key).await;
        }
        Ok(raw
            .into_iter()
            .filter_map(|member| match member.parse::<BoardId>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(%username, %member, "registry: skipping malformed board id in user index");
                    None
                }
            })
            .collect())
    }

    /// Set-membership check used for join dedup and stale leaves.
    ///
    /// # Errors
    ///
    /// Store failures propagate.
    pub async fn is_user_on_board(&self, board_id: BoardId, username: &str) -> Result<bool, StoreError> {
        let key = board_key(board_id);
        let present = self.store.is_member(&key, username).await?;
        if present {
            self.refresh(&key).await;
        }
        Ok(present)
    }

    /// Best-effort TTL refresh on read paths.
    async fn refresh(&self, key: &str) {
        if let Err(e) = self.store.expire(key, self.ttl).await {
            warn!(%key, error = %e, "registry: ttl refresh failed");
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
