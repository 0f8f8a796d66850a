use redis::AsyncCommands;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::RedisConfig;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("unable to connect redis: {0}")]
    Connect(#[source] redis::RedisError),
    #[error("redis command failed: {0}")]
    Command(#[source] redis::RedisError),
    #[error("cache worker stopped")]
    WorkerGone,
}

enum Command {
    Insert {
        key: String,
        value: String,
        ttl_secs: u64,
        resp: oneshot::Sender<Result<(), CacheError>>,
    },
    Find {
        key: String,
        resp: oneshot::Sender<Result<bool, CacheError>>,
    },
}

/// Handle to the cache worker. One spawned task owns the Redis connection
/// and serializes all commands arriving over the channel, so clones of
/// this handle are safe to use from any number of concurrent callers.
#[derive(Clone)]
pub struct Cache {
    tx: mpsc::Sender<Command>,
}

impl Cache {
    /// Connects and pings the store. An unreachable store fails here,
    /// before any message is processed.
    pub async fn connect(conf: &RedisConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(conf.url()).map_err(CacheError::Connect)?;
        let mut con = client
            .get_multiplexed_async_connection()
            .await
            .map_err(CacheError::Connect)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut con)
            .await
            .map_err(CacheError::Connect)?;

        info!(addr = %conf.addr, "connected to redis");

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(run_worker(con, rx));

        Ok(Self { tx })
    }

    /// Stores `value` under `key` with expiry. A zero TTL means
    /// "do not suppress" and no write happens.
    pub async fn insert(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            debug!(key, "zero ttl, skipping write");
            return Ok(());
        }

        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Command::Insert {
                key: key.to_string(),
                value: value.to_string(),
                ttl_secs: ttl.as_secs(),
                resp,
            })
            .await
            .map_err(|_| CacheError::WorkerGone)?;

        rx.await.map_err(|_| CacheError::WorkerGone)?
    }

    /// Existence lookup. `Ok(false)` is a normal miss; `Err` means the
    /// lookup itself failed.
    pub async fn find(&self, key: &str) -> Result<bool, CacheError> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Command::Find {
                key: key.to_string(),
                resp,
            })
            .await
            .map_err(|_| CacheError::WorkerGone)?;

        rx.await.map_err(|_| CacheError::WorkerGone)?
    }
}

async fn run_worker(mut con: redis::aio::MultiplexedConnection, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Insert {
                key,
                value,
                ttl_secs,
                resp,
            } => {
                let result = con
                    .set_ex::<_, _, ()>(&key, &value, ttl_secs)
                    .await
                    .map_err(CacheError::Command);
                let _ = resp.send(result);
            }
            Command::Find { key, resp } => {
                // Nil is a normal miss, not an error.
                let result = con
                    .get::<_, Option<String>>(&key)
                    .await
                    .map(|value| value.is_some())
                    .map_err(CacheError::Command);
                let _ = resp.send(result);
            }
        }
    }
}
