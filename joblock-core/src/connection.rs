//! Startup connection to the shared store.
//!
//! Mutual exclusion is only meaningful once every instance talks to the same
//! store, so startup waits here for as long as the store stays unreachable.
//! This is the one place in the crate that retries.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Fixed pause between failed connection attempts.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Runs `attempt` until it succeeds, sleeping `interval` after each failure.
///
/// There is no attempt limit and no backoff growth. Every failure is logged.
pub async fn retry_until_ready<T, E, F, Fut>(what: &str, interval: Duration, mut attempt: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut failures: u64 = 0;
    loop {
        match attempt().await {
            Ok(value) => {
                if failures > 0 {
                    tracing::info!(what, failures, "connected after retrying");
                }
                return value;
            }
            Err(e) => {
                failures += 1;
                tracing::error!(
                    what,
                    attempt = failures,
                    retry_in_secs = interval.as_secs_f64(),
                    "failed to connect: {}",
                    e
                );
                tokio::time::sleep(interval).await;
            }
        }
    }
}

#[cfg(feature = "postgres")]
pub use self::postgres::ConnectionManager;

#[cfg(feature = "postgres")]
mod postgres {
    use sqlx::PgPool;
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;

    use super::{CONNECT_RETRY_INTERVAL, retry_until_ready};
    use crate::config::redact;
    use crate::infrastructure_postgres::ensure_schema;

    const MAX_CONNECTIONS: u32 = 10;
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Owns the single startup attempt at reaching the shared store.
    ///
    /// `acquire` consumes the manager, so the loop cannot be entered twice.
    /// Reconnects after startup are left to the pool.
    pub struct ConnectionManager {
        url: String,
        retry_interval: Duration,
    }

    impl ConnectionManager {
        pub fn new(url: impl Into<String>) -> Self {
            Self {
                url: url.into(),
                retry_interval: CONNECT_RETRY_INTERVAL,
            }
        }

        pub fn with_retry_interval(mut self, interval: Duration) -> Self {
            self.retry_interval = interval;
            self
        }

        /// Blocks until a pool with a live connection and the lock schema is
        /// available. Never hands back a half-initialised pool.
        pub async fn acquire(self) -> PgPool {
            let target = redact(&self.url);
            tracing::info!(url = %target, "connecting to shared store");
            let pool = retry_until_ready("shared store", self.retry_interval, || {
                self.connect_once()
            })
            .await;
            tracing::info!(url = %target, "shared store ready");
            pool
        }

        async fn connect_once(&self) -> Result<PgPool, sqlx::Error> {
            let pool = PgPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect(&self.url)
                .await?;
            ensure_schema(&pool).await?;
            Ok(pool)
        }
    }
}
