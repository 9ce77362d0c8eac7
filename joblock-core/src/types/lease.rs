use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::OwnerId;

/// A lease held on one job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLock {
    /// The locked job. Need not reference a stored job.
    pub job_id: String,
    /// Instance holding the lease
    pub owner: OwnerId,
    /// Milliseconds since the UNIX epoch at which the lease lapses
    pub expires_at: u64,
}

impl JobLock {
    pub fn new(job_id: impl Into<String>, owner: OwnerId, lease: Duration, now: u64) -> Self {
        Self {
            job_id: job_id.into(),
            owner,
            expires_at: expiry(now, lease),
        }
    }

    /// A lock is live strictly before its expiry instant.
    pub fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

/// `now + lease`, saturating instead of wrapping.
pub fn expiry(now: u64, lease: Duration) -> u64 {
    let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX);
    now.saturating_add(lease_ms)
}
