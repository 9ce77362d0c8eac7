use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::types::{Job, JobLock, OwnerId};

/// CRUD over job records.
///
/// Every backend honours the same contract. I/O failures surface as
/// `Error::StorageUnavailable` and are never retried here.
#[async_trait]
pub trait JobAccess: Send + Sync {
    /// Insert or fully replace the record keyed by `job.id`.
    async fn put(&self, job: &Job) -> Result<()>;

    /// Create the record, failing with `JobAlreadyExists` if the id is taken.
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Replace an existing record, failing with `JobNotFound` if absent.
    async fn update(&self, job: &Job) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Unordered snapshot of every stored job.
    async fn list(&self) -> Result<Vec<Job>>;

    /// Remove the record. Deleting an absent id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn delete_all(&self) -> Result<()>;
}

/// Lease-based mutual exclusion over job ids.
///
/// At most one live lock exists per job id across every instance sharing the
/// backend. `acquire` is a single atomic insert-if-absent-or-expired; a
/// `false` from any method is a routine outcome, not a failure.
#[async_trait]
pub trait JobLocker: Send + Sync {
    /// Take the lock if nobody holds a live one. An expired lock held by any
    /// owner is replaced, which is how work moves off a crashed instance.
    async fn acquire(&self, job_id: &str, owner: &OwnerId, lease: Duration) -> Result<bool>;

    /// Extend a live lock held by `owner`. `false` means ownership is gone
    /// and the caller must stop working on the job.
    async fn renew(&self, job_id: &str, owner: &OwnerId, lease: Duration) -> Result<bool>;

    /// Drop the lock if `owner` holds it, expired or not.
    async fn release(&self, job_id: &str, owner: &OwnerId) -> Result<bool>;

    /// Advisory only: stale the moment it returns. Never decide ownership
    /// with it.
    async fn is_locked(&self, job_id: &str) -> Result<bool>;

    /// Advisory view of the live lock, if any.
    async fn current_lock(&self, job_id: &str) -> Result<Option<JobLock>>;
}

/// Milliseconds since the UNIX epoch, as seen by the local stores.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn starting_at(now_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
