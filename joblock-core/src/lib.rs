//! # joblock-core
//!
//! Lease-based job ownership for instances sharing one job store.
//! Provides backend selection from configuration, a job store contract,
//! and a job locker guaranteeing at most one live owner per job id.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "postgres")]
#[path = "infrastructure_postgres.rs"]
pub mod infrastructure_postgres;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod types;

pub use client::{Database, JobLocks};
pub use config::{BackendFamily, BackendKind, DbConfig};
pub use error::{Error, Result};
pub use infrastructure::{JobAccess, JobLocker};
pub use types::{Job, JobLock, OwnerId};

#[cfg(test)]
mod connection_test;
