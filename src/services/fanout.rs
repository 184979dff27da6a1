//! Broadcast fanout: domain events into envelopes, envelopes onto destinations.
//!
//! DESIGN
//! ======
//! Each `notify_*` call builds exactly one board-wide `UpdateEnvelope` and
//! publishes it to `/topic/board/<id>`. Assignment additionally sends one
//! private envelope to the assignee's `/queue/notifications` and enqueues a
//! durable notice.
//!
//! ERROR HANDLING
//! ==============
//! Fanout never fails its caller. Serialization, delivery and enqueue
//! problems are logged and swallowed so a broadcast problem can never roll
//! back the mutation that triggered it.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::destination::{BoardId, QUEUE_NOTIFICATIONS, board_topic, user_destination};
use crate::envelope::{TaskSnapshot, UpdateEnvelope, UpdateKind, UserSummary};
use crate::services::access::BoardRole;
use crate::services::broker::Broker;
use crate::services::notify::{AssignmentNotice, NotificationQueue};

#[derive(Clone)]
pub struct Fanout {
    broker: Arc<Broker>,
    queue: Arc<dyn NotificationQueue>,
}

impl Fanout {
    #[must_use]
    pub fn new(broker: Arc<Broker>, queue: Arc<dyn NotificationQueue>) -> Self {
        Self { broker, queue }
    }

    // =========================================================================
    // DELIVERY
    // =========================================================================

    /// Publish one envelope to the board topic. Returns subscribers reached.
    pub async fn broadcast(&self, board_id: BoardId, envelope: &UpdateEnvelope) -> usize {
        let destination = board_topic(board_id);
        let delivered = self.publish(&destination, envelope).await;
        debug!(%board_id, kind = ?envelope.kind, delivered, "fanout: board broadcast");
        delivered
    }

    /// Send a payload to one user's private queue on every connection the
    /// user holds. Returns subscribers reached.
    pub async fn send_private(&self, username: &str, queue: &str, payload: &impl Serialize) -> usize {
        let destination = user_destination(username, queue);
        let delivered = self.publish(&destination, payload).await;
        debug!(%username, %queue, delivered, "fanout: private send");
        delivered
    }

    async fn publish(&self, destination: &str, payload: &impl Serialize) -> usize {
        let body = match serde_json::to_value(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(%destination, error = %e, "fanout: failed to serialize payload");
                return 0;
            }
        };
        self.broker.publish(destination, &body).await
    }

    // =========================================================================
    // TASK EVENTS
    // =========================================================================

    pub async fn notify_task_created(&self, board_id: BoardId, task: TaskSnapshot, actor: &str) {
        let message = format!("{actor} created a new task: {}", task.title);
        let envelope = UpdateEnvelope::new(UpdateKind::TaskCreated, board_id, message).with_task(task);
        self.broadcast(board_id, &envelope).await;
    }

    pub async fn notify_task_updated(&self, board_id: BoardId, task: TaskSnapshot, actor: &str) {
        let message = format!("{actor} updated task: {}", task.title);
        let envelope = UpdateEnvelope::new(UpdateKind::TaskUpdated, board_id, message).with_task(task);
        self.broadcast(board_id, &envelope).await;
    }

    /// The task is gone by the time this runs, so only its id and title travel.
    pub async fn notify_task_deleted(&self, board_id: BoardId, task_id: Uuid, title: &str, actor: &str) {
        let message = format!("{actor} deleted task: {title}");
        let envelope = UpdateEnvelope::new(UpdateKind::TaskDeleted, board_id, message).with_task_id(task_id);
        self.broadcast(board_id, &envelope).await;
    }

    /// Board-wide TASK_ASSIGNED plus one private notice to the assignee.
    pub async fn notify_task_assigned(&self, board_id: BoardId, task: TaskSnapshot, actor: &str, assignee: &UserSummary) {
        let task_id = task.id;
        let title = task.title.clone();

        let public = UpdateEnvelope::new(
            UpdateKind::TaskAssigned,
            board_id,
            format!("{actor} assigned task '{title}' to {}", assignee.username),
        )
        .with_task(task.clone());
        self.broadcast(board_id, &public).await;

        let personal_message = format!("You have been assigned a new task: {title}");
        let private = UpdateEnvelope::new(UpdateKind::TaskAssigned, board_id, personal_message.clone())
            .with_task(task)
            .with_user(Some(assignee.id), assignee.username.as_str());
        self.send_private(&assignee.username, QUEUE_NOTIFICATIONS, &private).await;

        let notice = AssignmentNotice {
            user_id: Some(assignee.id),
            username: assignee.username.clone(),
            board_id,
            task_id,
            message: personal_message,
        };
        if let Err(e) = self.queue.enqueue(notice).await {
            warn!(%board_id, %task_id, username = %assignee.username, error = %e, "fanout: failed to enqueue assignment notice");
        }
    }

    // =========================================================================
    // BOARD EVENTS
    // =========================================================================

    pub async fn notify_board_updated(&self, board_id: BoardId, actor: &str) {
        let envelope = UpdateEnvelope::new(UpdateKind::BoardUpdated, board_id, format!("{actor} updated the board"));
        self.broadcast(board_id, &envelope).await;
    }

    pub async fn notify_member_added(&self, board_id: BoardId, member: &UserSummary, role: BoardRole, actor: &str) {
        let message = format!("{actor} added {} to the board as {role}", member.username);
        let envelope = UpdateEnvelope::new(UpdateKind::BoardUpdated, board_id, message)
            .with_user(Some(member.id), member.username.as_str());
        self.broadcast(board_id, &envelope).await;
    }

    pub async fn notify_member_removed(&self, board_id: BoardId, member: &UserSummary, actor: &str) {
        let message = format!("{actor} removed {} from the board", member.username);
        let envelope = UpdateEnvelope::new(UpdateKind::BoardUpdated, board_id, message)
            .with_user(Some(member.id), member.username.as_str());
        self.broadcast(board_id, &envelope).await;
    }

    // =========================================================================
    // PRESENCE EVENTS
    // =========================================================================

    pub async fn user_joined(&self, board_id: BoardId, user_id: Option<i64>, username: &str) {
        let envelope = UpdateEnvelope::new(UpdateKind::UserJoined, board_id, format!("{username} joined the board"))
            .with_user(user_id, username);
        self.broadcast(board_id, &envelope).await;
    }

    pub async fn user_left(&self, board_id: BoardId, user_id: Option<i64>, username: &str) {
        let envelope = UpdateEnvelope::new(UpdateKind::UserLeft, board_id, format!("{username} left the board"))
            .with_user(user_id, username);
        self.broadcast(board_id, &envelope).await;
    }

    /// Departure observed by the transport rather than requested by the user.
    pub async fn user_disconnected(&self, board_id: BoardId, username: &str) {
        let envelope = UpdateEnvelope::new(
            UpdateKind::UserLeft,
            board_id,
            format!("{username} disconnected from the board"),
        )
        .with_user(None, username);
        self.broadcast(board_id, &envelope).await;
    }
}

#[cfg(test)]
#[path = "fanout_test.rs"]
mod tests;
