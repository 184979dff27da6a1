//! Board access checks.
//!
//! SYSTEM CONTEXT
//! ==============
//! Board membership is owned by the REST service. This core only asks one
//! question, `can_access(board, identity)`, at subscribe time and again in
//! the join/ping handlers.
//!
//! DESIGN
//! ======
//! - `MembershipTable` answers from an in-process table (seeded from JSON)
//!   for single-process runs and tests.
//! - `HttpBoardAccess` asks the REST service and fails closed on transport,
//!   status or decode errors.
//! - Global admins pass every check in both implementations.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::destination::BoardId;
use crate::services::auth::Identity;

#[async_trait]
pub trait BoardAccess: Send + Sync {
    async fn can_access(&self, board_id: BoardId, identity: &Identity) -> bool;
}

// =============================================================================
// ROLES
// =============================================================================

/// Role a member holds on one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BoardRole {
    Owner,
    Admin,
    Editor,
    Viewer,
}

impl BoardRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::Admin => "ADMIN",
            Self::Editor => "EDITOR",
            Self::Viewer => "VIEWER",
        }
    }
}

impl fmt::Display for BoardRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown board role: {0}")]
pub struct UnknownRole(String);

impl FromStr for BoardRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OWNER" => Ok(Self::Owner),
            "ADMIN" => Ok(Self::Admin),
            "EDITOR" => Ok(Self::Editor),
            "VIEWER" => Ok(Self::Viewer),
            _ => Err(UnknownRole(s.to_owned())),
        }
    }
}

// =============================================================================
// IN-MEMORY TABLE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("failed to read board acl file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid board acl json: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One board's owner and members as stored in the seed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardAcl {
    pub id: BoardId,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub members: HashMap<String, BoardRole>,
}

impl BoardAcl {
    #[must_use]
    pub fn empty(id: BoardId) -> Self {
        Self { id, owner: None, members: HashMap::new() }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AclSeed {
    #[serde(default)]
    boards: Vec<BoardAcl>,
}

#[derive(Debug, Default)]
pub struct MembershipTable {
    boards: RwLock<HashMap<BoardId, BoardAcl>>,
}

impl MembershipTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{"boards": [{"id": 1, "owner": "alice", "members": {"bob": "EDITOR"}}]}`.
    ///
    /// # Errors
    ///
    /// Returns `Parse` for malformed JSON.
    pub fn from_json(raw: &str) -> Result<Self, AccessError> {
        let seed: AclSeed = serde_json::from_str(raw)?;
        let boards = seed.boards.into_iter().map(|acl| (acl.id, acl)).collect();
        Ok(Self { boards: RwLock::new(boards) })
    }

    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Parse` for malformed JSON.
    pub fn load(path: &Path) -> Result<Self, AccessError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub async fn set_owner(&self, board_id: BoardId, username: &str) {
        let mut boards = self.boards.write().await;
        let acl = boards.entry(board_id).or_insert_with(|| BoardAcl::empty(board_id));
        acl.owner = Some(username.to_owned());
    }

    pub async fn grant(&self, board_id: BoardId, username: &str, role: BoardRole) {
        let mut boards = self.boards.write().await;
        let acl = boards.entry(board_id).or_insert_with(|| BoardAcl::empty(board_id));
        acl.members.insert(username.to_owned(), role);
    }

    pub async fn revoke(&self, board_id: BoardId, username: &str) {
        if let Some(acl) = self.boards.write().await.get_mut(&board_id) {
            acl.members.remove(username);
        }
    }

    /// Effective role on a board; the owner field wins over the member map.
    pub async fn role_of(&self, board_id: BoardId, username: &str) -> Option<BoardRole> {
        let boards = self.boards.read().await;
        let acl = boards.get(&board_id)?;
        if acl.owner.as_deref() == Some(username) {
            return Some(BoardRole::Owner);
        }
        acl.members.get(username).copied()
    }
}

#[async_trait]
impl BoardAccess for MembershipTable {
    async fn can_access(&self, board_id: BoardId, identity: &Identity) -> bool {
        if identity.is_admin() {
            return true;
        }
        self.role_of(board_id, &identity.username).await.is_some()
    }
}

// =============================================================================
// HTTP COLLABORATOR
// =============================================================================

#[derive(Debug, Deserialize)]
struct AccessResponse {
    allowed: bool,
}

pub struct HttpBoardAccess {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBoardAccess {
    /// # Errors
    ///
    /// Returns the reqwest error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    async fn ask(&self, board_id: BoardId, username: &str) -> Result<bool, reqwest::Error> {
        let resp = self
            .client
            .get(format!("{}/api/boards/{board_id}/access", self.base_url))
            .query(&[("username", username)])
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<AccessResponse>().await?.allowed)
    }
}

#[async_trait]
impl BoardAccess for HttpBoardAccess {
    async fn can_access(&self, board_id: BoardId, identity: &Identity) -> bool {
        if identity.is_admin() {
            return true;
        }
        match self.ask(board_id, &identity.username).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(%board_id, username = %identity.username, error = %e, "access: lookup failed, denying");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "access_test.rs"]
mod tests;
