//! Queue of durable "you were assigned" notices.
//!
//! SYSTEM CONTEXT
//! ==============
//! Assignment fanout hands one `AssignmentNotice` to the queue whether or
//! not the assignee is connected. Delivery is the consumer's concern; this
//! side is fire-and-forget and callers only log enqueue failures.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::destination::BoardId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentNotice {
    pub user_id: Option<i64>,
    pub username: String,
    pub board_id: BoardId,
    pub task_id: Uuid,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("notification queue closed")]
    Closed,
    #[error("notification queue full")]
    Full,
    #[error("notification queue unavailable: {0}")]
    Unavailable(String),
    #[error("notification queue timed out")]
    Timeout,
    #[error("failed to encode notice: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait NotificationQueue: Send + Sync {
    async fn enqueue(&self, notice: AssignmentNotice) -> Result<(), QueueError>;
}

// =============================================================================
// IN-PROCESS CHANNEL
// =============================================================================

#[derive(Clone)]
pub struct ChannelNotificationQueue {
    tx: mpsc::Sender<AssignmentNotice>,
}

impl ChannelNotificationQueue {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AssignmentNotice>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue plus a consumer task that logs every notice it drains.
    #[must_use]
    pub fn spawn(capacity: usize) -> (Self, JoinHandle<()>) {
        let (queue, rx) = Self::new(capacity);
        (queue, spawn_log_consumer(rx))
    }
}

/// Drain notices until every sender is gone.
pub fn spawn_log_consumer(mut rx: mpsc::Receiver<AssignmentNotice>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notice) = rx.recv().await {
            info!(
                username = %notice.username,
                board_id = %notice.board_id,
                task_id = %notice.task_id,
                message = %notice.message,
                "notify: assignment notice delivered"
            );
        }
    })
}

#[async_trait]
impl NotificationQueue for ChannelNotificationQueue {
    async fn enqueue(&self, notice: AssignmentNotice) -> Result<(), QueueError> {
        self.tx.try_send(notice).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

// =============================================================================
// REDIS LIST
// =============================================================================

/// `RPUSH`es JSON notices onto a list consumed by the delivery worker.
#[derive(Clone)]
pub struct RedisNotificationQueue {
    conn: MultiplexedConnection,
    key: String,
    op_timeout: Duration,
}

impl RedisNotificationQueue {
    /// # Errors
    ///
    /// Returns `Unavailable` for a bad URL or refused connection.
    pub async fn connect(url: &str, key: &str, op_timeout: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(url).map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let conn = tokio::time::timeout(op_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| QueueError::Timeout)?
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(Self { conn, key: key.to_owned(), op_timeout })
    }
}

#[async_trait]
impl NotificationQueue for RedisNotificationQueue {
    async fn enqueue(&self, notice: AssignmentNotice) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&notice)?;
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(&self.key).arg(payload);
        let mut conn = self.conn.clone();
        let pushed: redis::RedisResult<i64> = tokio::time::timeout(self.op_timeout, cmd.query_async(&mut conn))
            .await
            .map_err(|_| QueueError::Timeout)?;
        pushed.map(|_| ()).map_err(|e| QueueError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
#[path = "notify_test.rs"]
mod tests;
