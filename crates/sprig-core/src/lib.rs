//! Lifecycle orchestration for sprig environments.
//!
//! This crate turns a human identifier (branch name, issue number or partial
//! environment name) into a canonical [`Environment`], derives its port set
//! without a central registry, and drives the adapters through provisioning
//! and teardown. Every fatal provisioning failure unwinds the completed steps
//! before the error surfaces. The finish workflow merges an environment into
//! mainline (directly or through a pull request) and reuses the same teardown.

pub mod concurrency;
pub mod finish;
pub mod hooks;
pub mod identity;
pub mod lifecycle;
pub mod orchestrator;
pub mod ports;
pub mod tracker;
pub mod vcs;

pub use concurrency::{install_signal_handler, shutdown_requested, ProjectLock};
pub use finish::{FinishOptions, FinishOutcome};
pub use hooks::EnvContext;
pub use identity::{
    branch_from_title, match_partial, worktree_path, Environment, LiveEnvironment, Match, Resolver,
};
pub use lifecycle::{validate_transition, EnvState};
pub use orchestrator::{
    state_dir, Adapters, BrowserSession, DownOutcome, DownReport, EnvStatus, Event,
    MigrateAction, MigrateOutcome, Observer, Orchestrator, Policy, Silent, Step, StepStatus,
    UpOptions, UpReport,
};
pub use ports::{allocate, base_offset, PortSet, Sibling, OFFSET_RANGE};
pub use tracker::{select_tracker, GitHub, Issue, IssueTracker, NoTracker, PullRequest};
pub use vcs::{BranchSource, Git, Vcs, Worktree};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] sprig_schema::ConfigError),
    #[error(transparent)]
    Name(#[from] sprig_schema::NameError),
    #[error(transparent)]
    Adapter(#[from] sprig_adapters::AdapterError),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("no environment matches '{0}'")]
    NotFound(String),
    #[error("'{query}' matches several environments: {}", matches.join(", "))]
    Ambiguous { query: String, matches: Vec<String> },
    #[error("all {OFFSET_RANGE} port offsets are in use by other environments of '{0}'")]
    PortsExhausted(String),
    #[error("resource conflict: {0}")]
    Conflict(String),
    #[error("refusing to tear down '{env}': {reason} (use --force to override)")]
    Unsafe { env: String, reason: String },
    #[error("nothing to merge: '{branch}' has no commits ahead of '{main}'")]
    NothingToMerge { branch: String, main: String },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("interrupted")]
    Interrupted,
    #[error("{step} failed: {source}")]
    StepFailed {
        step: Step,
        #[source]
        source: Box<CoreError>,
    },
    #[error("unexpected {tool} output: {detail}")]
    Parse { tool: &'static str, detail: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// True for configuration and name-validation failures, which are always
    /// raised before any resource is touched.
    pub fn is_configuration(&self) -> bool {
        match self {
            CoreError::Config(_) | CoreError::Name(_) | CoreError::Configuration(_) => true,
            CoreError::Adapter(e) => matches!(e, sprig_adapters::AdapterError::UnknownBackend { .. }),
            CoreError::StepFailed { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}
