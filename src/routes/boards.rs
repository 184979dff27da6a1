//! Board presence query and mutation-event intake.
//!
//! Both endpoints are for privileged callers: the admin UI reads who is
//! online, and the REST service posts mutation events after a successful
//! write so they reach board subscribers.

use axum::Json;
use axum::extract::{FromRef, Path, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::destination::BoardId;
use crate::envelope::{TaskSnapshot, UserSummary};
use crate::services::access::BoardRole;
use crate::services::auth::Identity;
use crate::state::AppState;

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Caller holding a valid bearer with the global ADMIN role.
/// Use as a handler parameter to require it.
pub struct AdminUser {
    pub identity: Identity,
}

impl<S> axum::extract::FromRequestParts<S> for AdminUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let app_state = AppState::from_ref(state);
        let identity = app_state.verifier.verify(token).map_err(|e| {
            debug!(error = %e, "boards: bearer rejected");
            StatusCode::UNAUTHORIZED
        })?;
        if !identity.is_admin() {
            warn!(username = %identity.username, "boards: non-admin caller");
            return Err(StatusCode::FORBIDDEN);
        }
        Ok(Self { identity })
    }
}

// =============================================================================
// PRESENCE
// =============================================================================

/// `GET /api/boards/{id}/ws-users`: usernames currently on the board, sorted.
pub async fn ws_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(board_id): Path<BoardId>,
) -> Result<Json<Vec<String>>, StatusCode> {
    let users = state.presence.active_users(board_id).await.map_err(|e| {
        error!(%board_id, error = %e, "boards: presence query failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    let mut users: Vec<String> = users.into_iter().collect();
    users.sort();
    Ok(Json(users))
}

// =============================================================================
// MUTATION EVENTS
// =============================================================================

/// Domain mutation reported by the REST service after it committed.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationEvent {
    TaskCreated { task: TaskSnapshot, actor: String },
    TaskUpdated { task: TaskSnapshot, actor: String },
    TaskDeleted { task_id: Uuid, title: String, actor: String },
    TaskAssigned { task: TaskSnapshot, actor: String, assignee: UserSummary },
    BoardUpdated { actor: String },
    MemberAdded { member: UserSummary, role: BoardRole, actor: String },
    MemberRemoved { member: UserSummary, actor: String },
}

impl MutationEvent {
    fn task_board(&self) -> Option<BoardId> {
        match self {
            Self::TaskCreated { task, .. } | Self::TaskUpdated { task, .. } | Self::TaskAssigned { task, .. } => {
                Some(task.board_id)
            }
            _ => None,
        }
    }
}

/// `POST /api/boards/{id}/events`: run the fanout for one mutation.
pub async fn post_event(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(board_id): Path<BoardId>,
    Json(event): Json<MutationEvent>,
) -> StatusCode {
    if event.task_board().is_some_and(|task_board| task_board != board_id) {
        warn!(%board_id, caller = %admin.identity.username, "boards: task belongs to another board");
        return StatusCode::UNPROCESSABLE_ENTITY;
    }

    let fanout = &state.fanout;
    match event {
        MutationEvent::TaskCreated { task, actor } => fanout.notify_task_created(board_id, task, &actor).await,
        MutationEvent::TaskUpdated { task, actor } => fanout.notify_task_updated(board_id, task, &actor).await,
        MutationEvent::TaskDeleted { task_id, title, actor } => {
            fanout.notify_task_deleted(board_id, task_id, &title, &actor).await;
        }
        MutationEvent::TaskAssigned { task, actor, assignee } => {
            fanout.notify_task_assigned(board_id, task, &actor, &assignee).await;
        }
        MutationEvent::BoardUpdated { actor } => fanout.notify_board_updated(board_id, &actor).await,
        MutationEvent::MemberAdded { member, role, actor } => {
            fanout.notify_member_added(board_id, &member, role, &actor).await;
        }
        MutationEvent::MemberRemoved { member, actor } => {
            fanout.notify_member_removed(board_id, &member, &actor).await;
        }
    }
    StatusCode::ACCEPTED
}

#[cfg(test)]
#[path = "boards_test.rs"]
mod tests;
