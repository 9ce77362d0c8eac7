//! SQLite-backed job store and locker for single-instance deployments.
//! Jobs and locks survive restarts of the one process using the file.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! joblock-core = { path = "../joblock-core", features = ["sqlite"] }
//! ```

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::infrastructure::{Clock, JobAccess, JobLocker, SystemClock};
use crate::types::{Job, JobLock, OwnerId, expiry};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS jobs (
        id      TEXT PRIMARY KEY,
        payload TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS job_locks (
        job_id     TEXT PRIMARY KEY,
        owner_id   TEXT NOT NULL,
        expires_at INTEGER NOT NULL
    );";

/// A persistent job store and locker backed by one SQLite file.
///
/// The connection sits behind a mutex, which serialises every statement and
/// gives `acquire` its compare-and-set behaviour together with the
/// conditional upsert.
///
/// Statements run synchronously on the calling task's thread. Each is a
/// single-row local file operation, which is acceptable for the one-instance
/// deployments this store serves; it is not meant for heavy concurrent load.
pub struct SqliteJobAccess {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteJobAccess {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        // WAL keeps readers off the writer's back
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::from_connection(conn, Arc::new(SystemClock))
    }

    /// A throwaway database that lives only as long as the value.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, Arc::new(SystemClock))
    }

    pub fn from_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> i64 {
        to_sql_millis(self.clock.now_ms())
    }

    fn row_to_job(id: String, payload: String) -> Result<Job> {
        Ok(Job {
            id,
            payload: serde_json::from_str(&payload)?,
        })
    }
}

fn to_sql_millis(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

#[async_trait]
impl JobAccess for SqliteJobAccess {
    async fn put(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_string(&job.payload)?;
        self.conn().execute(
            "INSERT INTO jobs (id, payload) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
            params![job.id, payload],
        )?;
        Ok(())
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_string(&job.payload)?;
        let rows = self.conn().execute(
            "INSERT INTO jobs (id, payload) VALUES (?1, ?2) ON CONFLICT(id) DO NOTHING",
            params![job.id, payload],
        )?;
        if rows == 0 {
            return Err(Error::JobAlreadyExists(job.id.clone()));
        }
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_string(&job.payload)?;
        let rows = self.conn().execute(
            "UPDATE jobs SET payload = ?2 WHERE id = ?1",
            params![job.id, payload],
        )?;
        if rows == 0 {
            return Err(Error::JobNotFound(job.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, payload FROM jobs WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        row.map(|(id, payload)| Self::row_to_job(id, payload))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare("SELECT id, payload FROM jobs")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter()
            .map(|(id, payload)| Self::row_to_job(id, payload))
            .collect()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        self.conn().execute("DELETE FROM jobs", [])?;
        Ok(())
    }
}

#[async_trait]
impl JobLocker for SqliteJobAccess {
    async fn acquire(&self, job_id: &str, owner: &OwnerId, lease: Duration) -> Result<bool> {
        let now = self.clock.now_ms();
        let expires_at = to_sql_millis(expiry(now, lease));
        let rows = self.conn().execute(
            "INSERT INTO job_locks (job_id, owner_id, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE
                SET owner_id = excluded.owner_id, expires_at = excluded.expires_at
                WHERE job_locks.expires_at <= ?4",
            params![job_id, owner.as_str(), expires_at, to_sql_millis(now)],
        )?;
        let granted = rows > 0;
        if granted {
            tracing::debug!(job_id, owner = %owner, "lock acquired");
        }
        Ok(granted)
    }

    async fn renew(&self, job_id: &str, owner: &OwnerId, lease: Duration) -> Result<bool> {
        let now = self.clock.now_ms();
        let rows = self.conn().execute(
            "UPDATE job_locks SET expires_at = ?3
             WHERE job_id = ?1 AND owner_id = ?2 AND expires_at > ?4",
            params![
                job_id,
                owner.as_str(),
                to_sql_millis(expiry(now, lease)),
                to_sql_millis(now)
            ],
        )?;
        if rows == 0 {
            tracing::debug!(job_id, owner = %owner, "renew refused, ownership lost");
        }
        Ok(rows > 0)
    }

    async fn release(&self, job_id: &str, owner: &OwnerId) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM job_locks WHERE job_id = ?1 AND owner_id = ?2",
            params![job_id, owner.as_str()],
        )?;
        Ok(rows > 0)
    }

    async fn is_locked(&self, job_id: &str) -> Result<bool> {
        let locked = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM job_locks WHERE job_id = ?1 AND expires_at > ?2)",
            params![job_id, self.now()],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(locked)
    }

    async fn current_lock(&self, job_id: &str) -> Result<Option<JobLock>> {
        let lock = self
            .conn()
            .query_row(
                "SELECT job_id, owner_id, expires_at FROM job_locks
                 WHERE job_id = ?1 AND expires_at > ?2",
                params![job_id, self.now()],
                |row| {
                    Ok(JobLock {
                        job_id: row.get(0)?,
                        owner: OwnerId::new(row.get::<_, String>(1)?),
                        expires_at: row.get::<_, i64>(2)?.max(0) as u64,
                    })
                },
            )
            .optional()?;
        Ok(lock)
    }
}
