//! Redis-backed presence store.
//!
//! DESIGN
//! ======
//! One multiplexed connection is shared by every caller. Each command is
//! bounded by `op_timeout`; a timeout surfaces as `StoreError::Timeout`,
//! which callers treat as retryable, never as an empty answer. `apply`
//! sends its operations in one `MULTI/EXEC` pipeline so both presence
//! indices change together.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{PresenceStore, SetOp, StoreError, ttl_millis};

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            return StoreError::Timeout;
        }
        if err.kind() == redis::ErrorKind::TypeError {
            return StoreError::Corrupt(err.to_string());
        }
        StoreError::Unavailable(err.to_string())
    }
}

#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    op_timeout: Duration,
}

impl RedisStore {
    /// Open a multiplexed connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` for a bad URL or refused connection, `Timeout`
    /// if the handshake exceeds `op_timeout`.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = bounded(op_timeout, client.get_multiplexed_async_connection()).await?;
        Ok(Self { conn, op_timeout })
    }

    async fn query<T: redis::FromRedisValue>(&self, cmd: redis::Cmd) -> Result<T, StoreError> {
        let mut conn = self.conn.clone();
        bounded(self.op_timeout, async move { cmd.query_async(&mut conn).await }).await
    }
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, redis::RedisError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout),
    }
}

#[async_trait]
impl PresenceStore for RedisStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(ttl_millis(ttl));
        self.query::<()>(cmd).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query(cmd).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        self.query::<()>(cmd).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(key).arg(ttl_millis(ttl));
        self.query::<()>(cmd).await
    }

    async fn members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        let mut cmd = redis::cmd("SMEMBERS");
        cmd.arg(key);
        self.query(cmd).await
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SISMEMBER");
        cmd.arg(key).arg(member);
        self.query(cmd).await
    }

    async fn apply(&self, ops: &[SetOp]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                SetOp::Add { key, member } => pipe.cmd("SADD").arg(key).arg(member).ignore(),
                // Redis drops a set once its last member is removed.
                SetOp::Remove { key, member } => pipe.cmd("SREM").arg(key).arg(member).ignore(),
                SetOp::Expire { key, ttl } => pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(*ttl)).ignore(),
            };
        }
        let mut conn = self.conn.clone();
        bounded(self.op_timeout, async move {
            let done: redis::RedisResult<()> = pipe.query_async(&mut conn).await;
            done
        })
        .await
    }
}
