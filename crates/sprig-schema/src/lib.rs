//! Configuration and naming layer for sprig.
//!
//! This crate defines everything that is derived from user input before any
//! resource is touched: the `sprig.toml` schema (`ConfigFile`) and its loaded,
//! immutable form (`Config`) with dotted key-path lookups, the validated
//! environment-name newtype (`EnvName`), slug helpers, and `{placeholder}`
//! expansion used by container patterns, start URLs and commands.

pub mod config;
pub mod template;
pub mod types;

pub use config::{
    expand_tilde, BrowserSection, Config, ConfigError, ConfigFile, CopyEntry, DatabaseSection,
    HookCommands, HookStage, HooksSection, MigrationsSection, OpenSection, PortsSection, ProjectSection, StorageSection,
    TrackerSection, CONFIG_FILE, DEFAULT_DEBUG_PORT_BASE,
};
pub use template::{expand, Vars};
pub use types::{slugify, validate_env_name, BranchName, EnvName, NameError, RESERVED_NAMES};
