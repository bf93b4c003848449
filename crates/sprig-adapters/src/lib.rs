//! Resource adapters and host integration for sprig environments.
//!
//! Each resource family is a capability trait with a closed set of backends
//! chosen by a configuration string: `DatabaseBackend` (postgres, mysql),
//! `Migrator` (sqlx, dbmate, script), `StorageBackend` (azure, s3) and
//! `BrowserBackend` (chrome, firefox), each with a file-backed `mock`
//! variant. The crate also owns the host process collaborator, the
//! debug-endpoint registry document and prerequisite checks.

pub mod browser;
pub mod database;
pub mod exec;
pub mod migration;
pub mod mock;
pub mod mysql;
pub mod postgres;
pub mod prereq;
pub mod process;
pub mod storage;

pub use browser::{select_browser, BrowserBackend};
pub use database::{database_name, select_database, DatabaseBackend, DbConnection, DropOutcome};
pub use migration::{select_migrator, Capability, MigrationEnv, Migrator};
pub use prereq::{check_prereqs, command_exists, format_missing, MissingPrereq};
pub use process::{DebugEndpoint, DebugRegistry, ProcessHost, ProcessInfo};
pub use storage::{
    container_names, create_containers, delete_containers, select_storage, ContainerResult,
    StorageBackend, StorageConnection,
};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: unknown {family} backend '{name}' (expected one of: {expected})")]
    UnknownBackend {
        family: &'static str,
        name: String,
        expected: &'static str,
    },
    #[error("'{tool}' is not available on this system (install: {hint})")]
    ToolUnavailable { tool: String, hint: String },
    #[error("{tool} failed: {detail}")]
    CommandFailed { tool: String, detail: String },
    #[error("database '{0}' already exists")]
    AlreadyExists(String),
    #[error("timed out after {}s waiting for {what}", waited.as_secs())]
    Timeout { what: String, waited: Duration },
    #[error("cannot connect to {0}")]
    ConnectionFailed(String),
    #[error("browser conflict: {0}")]
    Conflict(String),
    #[error("debug registry error: {0}")]
    Registry(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AdapterError {
    /// True when the failure is a missing executable rather than a failed call.
    pub fn is_tool_unavailable(&self) -> bool {
        matches!(self, AdapterError::ToolUnavailable { .. })
    }
}
