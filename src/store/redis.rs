//! Redis-backed store used in deployments.
//!
//! Every call is bounded by a configured timeout so a slow or partitioned
//! Redis can never wedge the request pipeline; callers map the resulting
//! `StoreError` onto their own fail-open/fail-closed policy.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::{debug, warn};

use super::{KeyValueStore, StoreError, StoreResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

pub struct RedisStore {
    client: redis::Client,
    connection: ConnectionManager,
    timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis and keep a self-healing managed connection.
    ///
    /// # Errors
    /// Returns an error when the URL is invalid or the initial connection fails.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        debug!("Connected to redis");
        Ok(Self {
            client,
            connection,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bounded<T, F>(&self, future: F) -> StoreResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let millis = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        match tokio::time::timeout(self.timeout, future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StoreError::Unavailable(err.to_string())),
            Err(_) => Err(StoreError::Timeout(millis)),
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut connection = self.connection.clone();
        self.bounded(async move {
            redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<String>>(&mut connection)
                .await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> StoreResult<()> {
        let mut connection = self.connection.clone();
        self.bounded(async move {
            let mut command = redis::cmd("SET");
            command.arg(key).arg(value);
            if let Some(ttl) = ttl_seconds {
                command.arg("EX").arg(ttl);
            }
            command.query_async::<_, ()>(&mut connection).await
        })
        .await
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        let mut connection = self.connection.clone();
        self.bounded(async move {
            redis::cmd("DEL")
                .arg(key)
                .query_async::<_, ()>(&mut connection)
                .await
        })
        .await
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut connection = self.connection.clone();
        self.bounded(async move {
            redis::cmd("INCR")
                .arg(key)
                .query_async::<_, i64>(&mut connection)
                .await
        })
        .await
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> StoreResult<()> {
        let mut connection = self.connection.clone();
        self.bounded(async move {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_seconds)
                .query_async::<_, ()>(&mut connection)
                .await
        })
        .await
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut connection = self.connection.clone();
        self.bounded(async move {
            redis::cmd("KEYS")
                .arg(pattern)
                .query_async::<_, Vec<String>>(&mut connection)
                .await
        })
        .await
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()> {
        let mut connection = self.connection.clone();
        self.bounded(async move {
            redis::cmd("PUBLISH")
                .arg(channel)
                .arg(message)
                .query_async::<_, ()>(&mut connection)
                .await
        })
        .await
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<UnboundedReceiver<String>> {
        let connection = self
            .bounded(self.client.get_async_connection())
            .await?;
        let mut pubsub = connection.into_pubsub();
        self.bounded(pubsub.subscribe(channel)).await?;

        let (tx, rx) = unbounded_channel();
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(message) = messages.next().await {
                match message.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!("Dropping malformed message on {channel}: {err}");
                    }
                }
            }
        });
        Ok(rx)
    }
}
