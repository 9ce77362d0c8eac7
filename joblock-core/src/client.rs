//! Process-wide entry point: picks the backend once at startup and hands out
//! the job store and locker behind their traits.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendFamily, BackendKind, DbConfig};
use crate::error::Result;
use crate::infrastructure::{JobAccess, JobLocker};
use crate::infrastructure_in_memory::InMemoryJobAccess;
use crate::types::OwnerId;

/// The job store and locker chosen for this process.
///
/// Built once at startup and passed around by reference; cloning is cheap
/// and shares the same backend.
#[derive(Clone)]
pub struct Database {
    family: BackendFamily,
    jobs: Arc<dyn JobAccess>,
    locker: Arc<dyn JobLocker>,
    lock_duration: Duration,
}

impl Database {
    /// Resolve the backend and open it.
    ///
    /// For the shared store this waits until the store is reachable, however
    /// long that takes. Configuration problems fail immediately.
    pub async fn open(config: &DbConfig) -> Result<Self> {
        let lock_duration = config.lock_duration()?;
        let kind = config.backend_kind()?;
        tracing::info!(backend = %kind, lock_secs = lock_duration.as_secs(), "opening job database");

        match kind {
            BackendKind::DurableShared { url, .. } => Self::open_shared(&url, lock_duration).await,
            BackendKind::LocalPersistent { path } => Self::open_file(&path, lock_duration),
            BackendKind::LocalEphemeral => Ok(Self::in_memory(lock_duration)),
        }
    }

    /// An in-memory database: single process, nothing persisted.
    pub fn in_memory(lock_duration: Duration) -> Self {
        Self::from_parts(
            BackendFamily::LocalEphemeral,
            Arc::new(InMemoryJobAccess::new()),
            lock_duration,
        )
    }

    /// Share one backend value as both store and locker.
    pub fn from_parts<B>(family: BackendFamily, backend: Arc<B>, lock_duration: Duration) -> Self
    where
        B: JobAccess + JobLocker + 'static,
    {
        Self {
            family,
            jobs: backend.clone(),
            locker: backend,
            lock_duration,
        }
    }

    #[cfg(feature = "postgres")]
    async fn open_shared(url: &str, lock_duration: Duration) -> Result<Self> {
        use crate::connection::ConnectionManager;
        use crate::infrastructure_postgres::{PostgresJobAccess, PostgresJobLocker};

        let pool = ConnectionManager::new(url).acquire().await;
        Ok(Self {
            family: BackendFamily::DurableShared,
            jobs: Arc::new(PostgresJobAccess::new(pool.clone())),
            locker: Arc::new(PostgresJobLocker::new(pool)),
            lock_duration,
        })
    }

    #[cfg(not(feature = "postgres"))]
    async fn open_shared(_url: &str, _lock_duration: Duration) -> Result<Self> {
        Err(crate::error::Error::configuration(
            "shared store configured but the `postgres` feature is not enabled",
        ))
    }

    #[cfg(feature = "sqlite")]
    fn open_file(path: &std::path::Path, lock_duration: Duration) -> Result<Self> {
        use crate::infrastructure_sqlite::SqliteJobAccess;

        let store = SqliteJobAccess::open(path)?;
        Ok(Self::from_parts(
            BackendFamily::LocalPersistent,
            Arc::new(store),
            lock_duration,
        ))
    }

    #[cfg(not(feature = "sqlite"))]
    fn open_file(path: &std::path::Path, _lock_duration: Duration) -> Result<Self> {
        Err(crate::error::Error::configuration(format!(
            "local file {} configured but the `sqlite` feature is not enabled",
            path.display()
        )))
    }

    pub fn family(&self) -> BackendFamily {
        self.family
    }

    pub fn jobs(&self) -> &dyn JobAccess {
        self.jobs.as_ref()
    }

    pub fn locker(&self) -> &dyn JobLocker {
        self.locker.as_ref()
    }

    /// The configured default lease.
    pub fn lock_duration(&self) -> Duration {
        self.lock_duration
    }

    /// Lock operations on behalf of one owner with the default lease.
    pub fn locks_for(&self, owner: OwnerId) -> JobLocks {
        JobLocks {
            locker: self.locker.clone(),
            owner,
            lease: self.lock_duration,
        }
    }
}

/// A locker bound to one owner and one lease duration.
#[derive(Clone)]
pub struct JobLocks {
    locker: Arc<dyn JobLocker>,
    owner: OwnerId,
    lease: Duration,
}

impl JobLocks {
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub async fn acquire(&self, job_id: &str) -> Result<bool> {
        self.locker.acquire(job_id, &self.owner, self.lease).await
    }

    /// `false` means another owner took over: abandon the job.
    pub async fn renew(&self, job_id: &str) -> Result<bool> {
        self.locker.renew(job_id, &self.owner, self.lease).await
    }

    pub async fn release(&self, job_id: &str) -> Result<bool> {
        self.locker.release(job_id, &self.owner).await
    }

    /// Advisory, see [`JobLocker::is_locked`].
    pub async fn is_locked(&self, job_id: &str) -> Result<bool> {
        self.locker.is_locked(job_id).await
    }
}
