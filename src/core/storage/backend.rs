//! Durable key-value backends.
//!
//! The store only needs single-key `GET`/`SET` plus a connectivity probe, so
//! the seam is kept that narrow. Redis is the production backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;

/// Upper bound on any single durable operation, including the startup probe.
pub const BACKEND_OP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
    #[error("backend operation timed out")]
    Timeout,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Connectivity check, called once when the store is constructed.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Redis over a multiplexed tokio connection.
pub struct RedisBackend {
    conn: MultiplexedConnection,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = with_timeout(async {
            client
                .get_multiplexed_tokio_connection()
                .await
                .map_err(StoreError::from)
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let reply: String = with_timeout(async {
            redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
                .map_err(StoreError::from)
        })
        .await?;
        if reply.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("unexpected PING reply {:?}", reply)))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        with_timeout(async {
            conn.get::<_, Option<String>>(key)
                .await
                .map_err(StoreError::from)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        with_timeout(async {
            conn.set::<_, _, ()>(key, value)
                .await
                .map_err(StoreError::from)
        })
        .await
    }
}

async fn with_timeout<T, F>(op: F) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(BACKEND_OP_TIMEOUT, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}
