use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::infrastructure::{Clock, JobAccess, JobLocker, SystemClock};
use crate::types::{Job, JobLock, OwnerId};

/// Job store and locker for a single process with no persistence.
///
/// No other instance can contend, so the lock table is a mutex-guarded map;
/// lease expiry still applies so callers see the same contract as the
/// shared backend.
pub struct InMemoryJobAccess {
    jobs: Mutex<HashMap<String, Job>>,
    // Job id -> lock. Expired entries stay until overwritten or released.
    locks: Mutex<HashMap<String, JobLock>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryJobAccess {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<String, JobLock>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryJobAccess {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobAccess for InMemoryJobAccess {
    async fn put(&self, job: &Job) -> Result<()> {
        self.jobs().insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        match self.jobs().entry(job.id.clone()) {
            Entry::Occupied(_) => Err(Error::JobAlreadyExists(job.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, job: &Job) -> Result<()> {
        match self.jobs().get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(Error::JobNotFound(job.id.clone())),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.jobs().get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Job>> {
        Ok(self.jobs().values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.jobs().remove(id);
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        self.jobs().clear();
        Ok(())
    }
}

#[async_trait]
impl JobLocker for InMemoryJobAccess {
    async fn acquire(&self, job_id: &str, owner: &OwnerId, lease: Duration) -> Result<bool> {
        let now = self.clock.now_ms();
        let mut locks = self.locks();
        if locks.get(job_id).is_some_and(|lock| lock.is_live(now)) {
            return Ok(false);
        }
        locks.insert(
            job_id.to_string(),
            JobLock::new(job_id, owner.clone(), lease, now),
        );
        tracing::debug!(job_id, owner = %owner, "lock acquired");
        Ok(true)
    }

    async fn renew(&self, job_id: &str, owner: &OwnerId, lease: Duration) -> Result<bool> {
        let now = self.clock.now_ms();
        let mut locks = self.locks();
        match locks.get_mut(job_id) {
            Some(lock) if lock.owner == *owner && lock.is_live(now) => {
                *lock = JobLock::new(job_id, owner.clone(), lease, now);
                Ok(true)
            }
            _ => {
                tracing::debug!(job_id, owner = %owner, "renew refused, ownership lost");
                Ok(false)
            }
        }
    }

    async fn release(&self, job_id: &str, owner: &OwnerId) -> Result<bool> {
        let mut locks = self.locks();
        match locks.get(job_id) {
            Some(lock) if lock.owner == *owner => {
                locks.remove(job_id);
                tracing::debug!(job_id, owner = %owner, "lock released");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_locked(&self, job_id: &str) -> Result<bool> {
        let now = self.clock.now_ms();
        Ok(self.locks().get(job_id).is_some_and(|lock| lock.is_live(now)))
    }

    async fn current_lock(&self, job_id: &str) -> Result<Option<JobLock>> {
        let now = self.clock.now_ms();
        Ok(self
            .locks()
            .get(job_id)
            .filter(|lock| lock.is_live(now))
            .cloned())
    }
}
