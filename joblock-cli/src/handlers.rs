use serde::{Deserialize, Serialize};

use joblock_core::{BackendFamily, Job, JobLock};

// ─── Validation ─────────────────────────────────────────────────────────────

const MAX_JOB_ID_LEN: usize = 256;

pub fn validate_job_id(id: &str) -> Result<(), String> {
    if id.trim().is_empty() {
        return Err("id is required".to_string());
    }
    if id.len() > MAX_JOB_ID_LEN {
        return Err(format!("id must be at most {} bytes", MAX_JOB_ID_LEN));
    }
    Ok(())
}

// ─── Request Types ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct JobRequest {
    pub id: String,
    pub payload: serde_json::Value,
}

impl JobRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_job_id(&self.id)
    }

    /// Checks the body against the id in the request path.
    pub fn validate_for(&self, path_id: &str) -> Result<(), String> {
        self.validate()?;
        if self.id != path_id {
            return Err("id doesn't match endpoint".to_string());
        }
        Ok(())
    }

    pub fn into_job(self) -> Job {
        Job::new(self.id, self.payload)
    }
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: BackendFamily,
    pub version: String,
}

#[derive(Serialize)]
pub struct LockInfo {
    pub job_id: String,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl LockInfo {
    pub fn from_lock(job_id: String, lock: Option<JobLock>) -> Self {
        match lock {
            Some(lock) => Self {
                job_id,
                locked: true,
                owner: Some(lock.owner.to_string()),
                expires_at: Some(lock.expires_at),
            },
            None => Self {
                job_id,
                locked: false,
                owner: None,
                expires_at: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_request_must_match_path() {
        let req = JobRequest {
            id: "order-1".to_string(),
            payload: json!({}),
        };
        assert!(req.validate_for("order-1").is_ok());
        assert_eq!(
            req.validate_for("order-2").unwrap_err(),
            "id doesn't match endpoint"
        );
    }

    #[test]
    fn test_job_id_validation() {
        assert!(validate_job_id("").is_err());
        assert!(validate_job_id("   ").is_err());
        assert!(validate_job_id(&"x".repeat(MAX_JOB_ID_LEN + 1)).is_err());
        assert!(validate_job_id("order-1").is_ok());
    }

    #[test]
    fn test_unlocked_info_omits_owner() {
        let info = serde_json::to_value(LockInfo::from_lock("j".to_string(), None)).unwrap();
        assert_eq!(info, json!({"job_id": "j", "locked": false}));
    }
}
