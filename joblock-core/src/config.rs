//! Database configuration and backend selection.
//!
//! Resolution is a pure function of the configuration: nothing here opens a
//! socket or touches the filesystem, so it can run before any network call.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{Error, Result};

/// Shortest lease the configuration accepts, in seconds.
pub const MIN_LOCK_SECONDS: u64 = 10;

pub const DEFAULT_LOCK_SECONDS: u64 = 45;

const SHARED_SCHEMES: &[&str] = &["postgres", "postgresql"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Shared-store connection string, e.g. `postgres://user:pw@host/jobs`
    pub database_url: Option<String>,
    /// File for the single-instance persistent store
    pub local_file: Option<PathBuf>,
    /// How long locks persist without renewal. Too short and instances fight
    /// over live jobs; too long and a crashed instance's jobs sit idle.
    pub lock_seconds: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            local_file: None,
            lock_seconds: DEFAULT_LOCK_SECONDS,
        }
    }
}

impl DbConfig {
    /// The default lease applied to every lock operation.
    pub fn lock_duration(&self) -> Result<Duration> {
        if self.lock_seconds < MIN_LOCK_SECONDS {
            return Err(Error::configuration(format!(
                "lock_seconds must be at least {}, got {}",
                MIN_LOCK_SECONDS, self.lock_seconds
            )));
        }
        Ok(Duration::from_secs(self.lock_seconds))
    }

    pub fn backend_kind(&self) -> Result<BackendKind> {
        if let Some(raw) = non_empty(self.database_url.as_deref()) {
            let database = shared_database_name(raw)?;
            return Ok(BackendKind::DurableShared {
                url: raw.to_string(),
                database,
            });
        }
        let local = self
            .local_file
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty());
        if let Some(path) = local {
            return Ok(BackendKind::LocalPersistent { path: path.clone() });
        }
        Ok(BackendKind::LocalEphemeral)
    }
}

/// Resolves which storage family is active. An absent configuration means
/// no database was configured at all.
pub fn resolve(config: Option<&DbConfig>) -> Result<BackendKind> {
    match config {
        Some(config) => config.backend_kind(),
        None => Ok(BackendKind::LocalEphemeral),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendFamily {
    DurableShared,
    LocalPersistent,
    LocalEphemeral,
}

impl fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendFamily::DurableShared => write!(f, "DURABLE_SHARED"),
            BackendFamily::LocalPersistent => write!(f, "LOCAL_PERSISTENT"),
            BackendFamily::LocalEphemeral => write!(f, "LOCAL_EPHEMERAL"),
        }
    }
}

/// The resolved backend together with what is needed to open it.
#[derive(Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// Reachable by every instance. Carries the raw URL and the logical
    /// database named by its path.
    DurableShared { url: String, database: String },
    /// Single-instance file-backed store.
    LocalPersistent { path: PathBuf },
    /// In-memory, gone when the process exits.
    LocalEphemeral,
}

impl BackendKind {
    pub fn family(&self) -> BackendFamily {
        match self {
            BackendKind::DurableShared { .. } => BackendFamily::DurableShared,
            BackendKind::LocalPersistent { .. } => BackendFamily::LocalPersistent,
            BackendKind::LocalEphemeral => BackendFamily::LocalEphemeral,
        }
    }
}

// Never print a connection string with its password.
impl fmt::Debug for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::DurableShared { url, database } => f
                .debug_struct("DurableShared")
                .field("url", &redact(url))
                .field("database", database)
                .finish(),
            BackendKind::LocalPersistent { path } => {
                f.debug_struct("LocalPersistent").field("path", path).finish()
            }
            BackendKind::LocalEphemeral => f.write_str("LocalEphemeral"),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::DurableShared { url, database } => {
                write!(f, "{} ({}, database '{}')", self.family(), redact(url), database)
            }
            BackendKind::LocalPersistent { path } => {
                write!(f, "{} ({})", self.family(), path.display())
            }
            BackendKind::LocalEphemeral => write!(f, "{}", self.family()),
        }
    }
}

/// Masks the password of a connection string for logs and errors.
pub fn redact(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable connection string>".to_string(),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn shared_database_name(raw: &str) -> Result<String> {
    let url = Url::parse(raw)
        .map_err(|e| Error::configuration(format!("unsupported shared store URI: {}", e)))?;

    if !SHARED_SCHEMES.contains(&url.scheme()) {
        return Err(Error::configuration(format!(
            "unsupported shared store URI {}: scheme must be one of {}",
            redact(raw),
            SHARED_SCHEMES.join(", ")
        )));
    }

    let segment = url.path().trim_start_matches('/');
    if segment.is_empty() || segment.contains('/') {
        return Err(Error::configuration(format!(
            "unsupported shared store URI {}: path must name the database",
            redact(raw)
        )));
    }
    let database = percent_decode_str(segment).decode_utf8().map_err(|_| {
        Error::configuration(format!(
            "unsupported shared store URI {}: database name is not valid UTF-8",
            redact(raw)
        ))
    })?;
    Ok(database.into_owned())
}
