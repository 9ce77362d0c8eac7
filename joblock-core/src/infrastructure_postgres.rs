//! PostgreSQL-backed job store and locker, shared by every instance.
//!
//! Lock expiry is evaluated against the database server clock so that
//! instances with skewed local clocks still agree on who owns a job.
//!
//! ## Atomic acquire
//!
//! `job_locks.job_id` is the primary key. `acquire` is one statement:
//! insert the row, or on conflict overwrite it only when the existing lease
//! has lapsed. Postgres serialises concurrent upserts on the same key, so at
//! most one caller sees a row come back.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::infrastructure::{JobAccess, JobLocker};
use crate::types::{Job, JobLock, OwnerId};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS jobs (
        id      TEXT PRIMARY KEY,
        payload JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS job_locks (
        job_id     TEXT PRIMARY KEY,
        owner_id   TEXT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_job_locks_expires_at ON job_locks (expires_at)",
];

/// Creates the tables if they are missing. Safe to run from every instance.
pub async fn ensure_schema(pool: &PgPool) -> std::result::Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

fn lease_secs(lease: Duration) -> f64 {
    lease.as_secs_f64()
}

/// Job records in the `jobs` table.
#[derive(Debug, Clone)]
pub struct PostgresJobAccess {
    pool: PgPool,
}

impl PostgresJobAccess {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobAccess for PostgresJobAccess {
    async fn put(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, payload) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload
            "#,
        )
        .bind(&job.id)
        .bind(Json(&job.payload))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO jobs (id, payload) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&job.id)
        .bind(Json(&job.payload))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::JobAlreadyExists(job.id.clone()));
        }
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET payload = $2 WHERE id = $1")
            .bind(&job.id)
            .bind(Json(&job.payload))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(job.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT id, payload FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_job(&row)).transpose()
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT id, payload FROM jobs")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM jobs").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job> {
    let Json(payload) = row.try_get::<Json<serde_json::Value>, _>("payload")?;
    Ok(Job {
        id: row.try_get("id")?,
        payload,
    })
}

/// Lease rows in the `job_locks` table.
#[derive(Debug, Clone)]
pub struct PostgresJobLocker {
    pool: PgPool,
}

impl PostgresJobLocker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobLocker for PostgresJobLocker {
    async fn acquire(&self, job_id: &str, owner: &OwnerId, lease: Duration) -> Result<bool> {
        let granted = sqlx::query(
            r#"
            INSERT INTO job_locks (job_id, owner_id, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            ON CONFLICT (job_id) DO UPDATE
                SET owner_id = EXCLUDED.owner_id, expires_at = EXCLUDED.expires_at
                WHERE job_locks.expires_at <= now()
            RETURNING job_id
            "#,
        )
        .bind(job_id)
        .bind(owner.as_str())
        .bind(lease_secs(lease))
        .fetch_optional(&self.pool)
        .await?
        .is_some();

        if granted {
            tracing::debug!(job_id, owner = %owner, "lock acquired");
        }
        Ok(granted)
    }

    async fn renew(&self, job_id: &str, owner: &OwnerId, lease: Duration) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_locks SET expires_at = now() + make_interval(secs => $3)
            WHERE job_id = $1 AND owner_id = $2 AND expires_at > now()
            "#,
        )
        .bind(job_id)
        .bind(owner.as_str())
        .bind(lease_secs(lease))
        .execute(&self.pool)
        .await?;

        let renewed = result.rows_affected() > 0;
        if !renewed {
            tracing::debug!(job_id, owner = %owner, "renew refused, ownership lost");
        }
        Ok(renewed)
    }

    async fn release(&self, job_id: &str, owner: &OwnerId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM job_locks WHERE job_id = $1 AND owner_id = $2")
            .bind(job_id)
            .bind(owner.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_locked(&self, job_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM job_locks WHERE job_id = $1 AND expires_at > now())",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<bool, _>(0)?)
    }

    async fn current_lock(&self, job_id: &str) -> Result<Option<JobLock>> {
        let row = sqlx::query(
            r#"
            SELECT job_id, owner_id,
                   (EXTRACT(EPOCH FROM expires_at) * 1000)::BIGINT AS expires_at_ms
            FROM job_locks
            WHERE job_id = $1 AND expires_at > now()
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<JobLock> {
            Ok(JobLock {
                job_id: row.try_get("job_id")?,
                owner: OwnerId::new(row.try_get::<String, _>("owner_id")?),
                expires_at: row.try_get::<i64, _>("expires_at_ms")?.max(0) as u64,
            })
        })
        .transpose()
    }
}
