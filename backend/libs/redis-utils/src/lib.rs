use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::info;

/// Shared Redis connection manager guarded by a Tokio mutex.
///
/// Hold the lock only long enough to clone the manager; the clone shares the
/// multiplexed connection, so callers on different tasks never queue behind
/// each other's round trips.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Deadline applied to a single Redis command when the caller has no opinion.
pub const DEFAULT_REDIS_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis connection pool backed by a reconnecting `ConnectionManager`.
pub struct RedisPool {
    manager: SharedConnectionManager,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to parse REDIS_URL connection string")?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;

        info!("Redis connection manager initialized");

        Ok(Self {
            manager: Arc::new(Mutex::new(connection_manager)),
        })
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }
}

/// Run a Redis command with a deadline.
///
/// An elapsed deadline is reported as a `TimedOut` I/O error, so
/// `RedisError::is_timeout` tells it apart from a refused or dropped connection.
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T, RedisError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(timeout_error(duration)),
    }
}

fn timeout_error(duration: Duration) -> RedisError {
    RedisError::from(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("redis operation timed out: no response within {:?}", duration),
    ))
}
