//! Broadcast payloads.
//!
//! `UpdateEnvelope` is the one shape every board-wide event takes on the
//! wire. Fields are camelCase to match the browser client. Envelopes are
//! built once per broadcast call and never mutated after send.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::destination::BoardId;
use crate::frame::now_ms;

/// Kind of domain event carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateKind {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    TaskAssigned,
    UserJoined,
    UserLeft,
    BoardUpdated,
}

/// Public user fields embedded in task snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
}

/// Materialized task as supplied by the task store. Never queried here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub title: String,
    pub board_id: BoardId,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<UserSummary>,
    #[serde(default)]
    pub assigned_to: Option<UserSummary>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEnvelope {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub board_id: BoardId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_data: Option<TaskSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub message: String,
    /// Milliseconds since Unix epoch.
    pub timestamp: i64,
}

impl UpdateEnvelope {
    #[must_use]
    pub fn new(kind: UpdateKind, board_id: BoardId, message: impl Into<String>) -> Self {
        Self {
            kind,
            board_id,
            task_id: None,
            task_data: None,
            user_id: None,
            username: None,
            message: message.into(),
            timestamp: now_ms(),
        }
    }

    /// Attach a task snapshot; also sets `task_id`.
    #[must_use]
    pub fn with_task(mut self, task: TaskSnapshot) -> Self {
        self.task_id = Some(task.id);
        self.task_data = Some(task);
        self
    }

    #[must_use]
    pub fn with_task_id(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: Option<i64>, username: impl Into<String>) -> Self {
        self.user_id = user_id;
        self.username = Some(username.into());
        self
    }
}

/// Outcome of a private presence reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Confirmation,
    Error,
}

/// Reply sent only to the requesting user (join confirmation, pong, errors).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateReply {
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board_id: Option<BoardId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_users: Option<usize>,
    pub timestamp: i64,
}

impl PrivateReply {
    #[must_use]
    pub fn confirmation(board_id: BoardId, message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Confirmation,
            board_id: Some(board_id),
            code: None,
            message: message.into(),
            active_users: None,
            timestamp: now_ms(),
        }
    }

    #[must_use]
    pub fn error(board_id: Option<BoardId>, code: &str, message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            board_id,
            code: Some(code.to_owned()),
            message: message.into(),
            active_users: None,
            timestamp: now_ms(),
        }
    }

    #[must_use]
    pub fn with_active_users(mut self, count: usize) -> Self {
        self.active_users = Some(count);
        self
    }
}

#[cfg(test)]
#[path = "envelope_test.rs"]
mod tests;
