use crate::types::slugify;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up at the root of the primary checkout.
pub const CONFIG_FILE: &str = "sprig.toml";

/// Remote-debugging base port used when `[browser]` does not set one.
pub const DEFAULT_DEBUG_PORT_BASE: u16 = 9222;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("configuration error: {0}")]
    Invalid(String),
    #[error("configuration error: missing required key '{0}'")]
    MissingKey(String),
}

/// Raw `sprig.toml` contents. Every section is optional; `migrations`,
/// `storage` and `browser` switch their subsystem off entirely when absent.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub ports: PortsSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub migrations: Option<MigrationsSection>,
    #[serde(default)]
    pub storage: Option<StorageSection>,
    #[serde(default)]
    pub browser: Option<BrowserSection>,
    #[serde(default)]
    pub hooks: HooksSection,
    #[serde(default)]
    pub copy: Vec<CopyEntry>,
    #[serde(default)]
    pub open: OpenSection,
    #[serde(default)]
    pub tracker: TrackerSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_main_branch")]
    pub main_branch: String,
    #[serde(default = "default_worktree_root")]
    pub worktree_root: String,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub squash: bool,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: None,
            main_branch: default_main_branch(),
            worktree_root: default_worktree_root(),
            build: None,
            squash: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PortsSection {
    #[serde(default = "default_https_port")]
    pub https: u16,
    #[serde(default = "default_http_port")]
    pub http: u16,
    #[serde(default = "default_vite_port")]
    pub vite: u16,
}

impl Default for PortsSection {
    fn default() -> Self {
        Self {
            https: default_https_port(),
            http: default_http_port(),
            vite: default_vite_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    #[serde(default = "default_database_backend")]
    pub backend: String,
    #[serde(default = "default_database_host")]
    pub host: String,
    #[serde(default = "default_database_port")]
    pub port: u16,
    #[serde(default = "default_database_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            backend: default_database_backend(),
            host: default_database_host(),
            port: default_database_port(),
            user: default_database_user(),
            password: String::new(),
            prefix: None,
            wait_seconds: default_wait_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MigrationsSection {
    #[serde(default = "default_migration_tool")]
    pub tool: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_migration_dir")]
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    pub backend: String,
    #[serde(default)]
    pub connection: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub containers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BrowserSection {
    pub backend: String,
    #[serde(default = "default_start_url")]
    pub start_url: String,
    #[serde(default = "default_debug_port_base")]
    pub debug_port_base: u16,
    #[serde(default = "default_registry")]
    pub registry: String,
}

/// A hook stage holds either one shell command or an ordered list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HookCommands {
    One(String),
    Many(Vec<String>),
}

impl Default for HookCommands {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct HooksSection {
    #[serde(default)]
    pub pre_setup: HookCommands,
    #[serde(default)]
    pub post_database: HookCommands,
    #[serde(default)]
    pub post_migrate: HookCommands,
    #[serde(default)]
    pub post_setup: HookCommands,
    #[serde(default)]
    pub pre_cleanup: HookCommands,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CopyEntry {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
}

impl CopyEntry {
    pub fn destination(&self) -> &str {
        self.to.as_deref().unwrap_or(&self.from)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OpenSection {
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TrackerSection {
    #[serde(default = "default_tracker_backend")]
    pub backend: String,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            backend: default_tracker_backend(),
        }
    }
}

fn default_main_branch() -> String {
    "main".to_owned()
}
fn default_worktree_root() -> String {
    "..".to_owned()
}
fn default_https_port() -> u16 {
    3000
}
fn default_http_port() -> u16 {
    4000
}
fn default_vite_port() -> u16 {
    5173
}
fn default_database_backend() -> String {
    "postgres".to_owned()
}
fn default_database_host() -> String {
    "localhost".to_owned()
}
fn default_database_port() -> u16 {
    5432
}
fn default_database_user() -> String {
    "postgres".to_owned()
}
fn default_wait_seconds() -> u64 {
    30
}
fn default_migration_tool() -> String {
    "sqlx".to_owned()
}
fn default_migration_dir() -> String {
    "migrations".to_owned()
}
fn default_start_url() -> String {
    "https://localhost:{https_port}".to_owned()
}
fn default_debug_port_base() -> u16 {
    DEFAULT_DEBUG_PORT_BASE
}
fn default_registry() -> String {
    "~/.config/sprig/debug-endpoints.json".to_owned()
}
fn default_tracker_backend() -> String {
    "github".to_owned()
}

/// Lifecycle stages that accept hook commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    PreSetup,
    PostDatabase,
    PostMigrate,
    PostSetup,
    PreCleanup,
}

impl HookStage {
    pub const ALL: [HookStage; 5] = [
        HookStage::PreSetup,
        HookStage::PostDatabase,
        HookStage::PostMigrate,
        HookStage::PostSetup,
        HookStage::PreCleanup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HookStage::PreSetup => "pre-setup",
            HookStage::PostDatabase => "post-database",
            HookStage::PostMigrate => "post-migrate",
            HookStage::PostSetup => "post-setup",
            HookStage::PreCleanup => "pre-cleanup",
        }
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loaded, validated, immutable configuration for one primary checkout.
///
/// Built once per invocation and shared by reference with every component.
/// Typed sections cover the documented key space; [`Config::get`] and
/// [`Config::get_array`] give dotted key-path access to the raw tree.
#[derive(Debug, Clone)]
pub struct Config {
    file: ConfigFile,
    tree: toml::Table,
    root: PathBuf,
    project_name: String,
}

impl Config {
    /// Load `sprig.toml` from `root`. A missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Self::from_parts(ConfigFile::default(), toml::Table::new(), root);
        }
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::parse(&content, root)
    }

    pub fn parse(input: &str, root: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(input)?;
        let tree: toml::Table = input.parse()?;
        Self::from_parts(file, tree, root)
    }

    fn from_parts(file: ConfigFile, tree: toml::Table, root: &Path) -> Result<Self, ConfigError> {
        let project_name = match &file.project.name {
            Some(name) => slugify(name),
            None => root
                .file_name()
                .map(|n| slugify(&n.to_string_lossy()))
                .unwrap_or_default(),
        };
        if project_name.is_empty() {
            return Err(ConfigError::Invalid(
                "project.name is empty and cannot be derived from the checkout directory"
                    .to_owned(),
            ));
        }
        if file.project.main_branch.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "project.main_branch must not be empty".to_owned(),
            ));
        }

        let bases = [
            ("ports.https", file.ports.https),
            ("ports.http", file.ports.http),
            ("ports.vite", file.ports.vite),
        ];
        for (key, base) in bases {
            if u32::from(base) + 99 > u32::from(u16::MAX) {
                return Err(ConfigError::Invalid(format!(
                    "{key} = {base} leaves no room for 100 environment offsets"
                )));
            }
        }

        if let Some(m) = &file.migrations {
            if m.tool == "script" && m.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                return Err(ConfigError::MissingKey("migrations.command".to_owned()));
            }
        }
        if let Some(s) = &file.storage {
            if s.containers.iter().any(|c| c.trim().is_empty()) {
                return Err(ConfigError::Invalid(
                    "storage.containers entries must not be empty".to_owned(),
                ));
            }
        }
        if let Some(b) = &file.browser {
            if u32::from(b.debug_port_base) + 99 > u32::from(u16::MAX) {
                return Err(ConfigError::Invalid(format!(
                    "browser.debug_port_base = {} leaves no room for 100 environment offsets",
                    b.debug_port_base
                )));
            }
        }

        Ok(Self {
            file,
            tree,
            root: root.to_path_buf(),
            project_name,
        })
    }

    /// String value at a dotted key path (`database.host`), or `default`.
    /// Integers, floats and booleans are rendered as strings.
    pub fn get(&self, key_path: &str, default: &str) -> String {
        match self.lookup(key_path) {
            Some(toml::Value::String(s)) => s.clone(),
            Some(toml::Value::Integer(i)) => i.to_string(),
            Some(toml::Value::Float(f)) => f.to_string(),
            Some(toml::Value::Boolean(b)) => b.to_string(),
            _ => default.to_owned(),
        }
    }

    /// String sequence at a dotted key path. A single string counts as a
    /// one-element sequence; missing keys and other types yield nothing.
    pub fn get_array(&self, key_path: &str) -> Vec<String> {
        match self.lookup(key_path) {
            Some(toml::Value::String(s)) => vec![s.clone()],
            Some(toml::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn lookup(&self, key_path: &str) -> Option<&toml::Value> {
        let mut parts = key_path.split('.');
        let mut current = self.tree.get(parts.next()?)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }

    pub fn file(&self) -> &ConfigFile {
        &self.file
    }

    /// Root of the primary checkout.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn main_branch(&self) -> &str {
        &self.file.project.main_branch
    }

    /// Directory that holds the `<project>-<env>` worktrees.
    pub fn worktree_root(&self) -> PathBuf {
        let configured = Path::new(&self.file.project.worktree_root);
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            normalize_path(&self.root.join(configured))
        }
    }

    pub fn build_command(&self) -> Option<&str> {
        self.file
            .project
            .build
            .as_deref()
            .filter(|c| !c.trim().is_empty())
    }

    pub fn ports(&self) -> PortsSection {
        self.file.ports
    }

    pub fn database(&self) -> &DatabaseSection {
        &self.file.database
    }

    /// Prefix for per-environment database names; defaults to the project
    /// name with hyphens turned into underscores.
    pub fn database_prefix(&self) -> String {
        self.file
            .database
            .prefix
            .clone()
            .unwrap_or_else(|| self.project_name.replace('-', "_"))
    }

    pub fn migrations(&self) -> Option<&MigrationsSection> {
        self.file.migrations.as_ref()
    }

    pub fn storage(&self) -> Option<&StorageSection> {
        self.file.storage.as_ref()
    }

    pub fn browser(&self) -> Option<&BrowserSection> {
        self.file.browser.as_ref()
    }

    pub fn debug_port_base(&self) -> u16 {
        self.file
            .browser
            .as_ref()
            .map_or(DEFAULT_DEBUG_PORT_BASE, |b| b.debug_port_base)
    }

    /// Host-level debug registry path with `~/` expanded.
    pub fn registry_path(&self) -> Option<PathBuf> {
        self.file.browser.as_ref().map(|b| expand_tilde(&b.registry))
    }

    pub fn hooks(&self, stage: HookStage) -> Vec<String> {
        self.get_array(&format!("hooks.{stage}"))
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect()
    }

    pub fn copies(&self) -> &[CopyEntry] {
        &self.file.copy
    }

    pub fn open_commands(&self) -> &[String] {
        &self.file.open.commands
    }

    pub fn tracker_backend(&self) -> &str {
        &self.file.tracker.backend
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Lexically resolve `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/work/shop")
    }

    #[test]
    fn parses_full_config() {
        let input = r#"
[project]
name = "Shop"
main_branch = "trunk"
build = "npm run build"

[ports]
https = 8400
http = 8000
vite = 5100

[database]
backend = "mysql"
port = 3306
user = "root"
wait_seconds = 5

[migrations]
tool = "dbmate"

[storage]
backend = "azure"
connection = "UseDevelopmentStorage=true"
containers = ["{env}-uploads", "{env}-media"]

[browser]
backend = "chrome"

[hooks]
pre-setup = "echo hi"
post-setup = ["npm install", "npm run seed"]

[[copy]]
from = ".env"

[[copy]]
from = "config/local.example.json"
to = "config/local.json"

[open]
commands = ["code {worktree}"]
"#;
        let config = Config::parse(input, &root()).expect("should parse");
        assert_eq!(config.project_name(), "shop");
        assert_eq!(config.main_branch(), "trunk");
        assert_eq!(config.build_command(), Some("npm run build"));
        assert_eq!(config.ports().https, 8400);
        assert_eq!(config.database().backend, "mysql");
        assert_eq!(config.database().wait_seconds, 5);
        assert_eq!(config.migrations().unwrap().tool, "dbmate");
        assert_eq!(config.storage().unwrap().containers.len(), 2);
        assert_eq!(
            config.browser().unwrap().start_url,
            "https://localhost:{https_port}"
        );
        assert_eq!(config.hooks(HookStage::PreSetup), vec!["echo hi"]);
        assert_eq!(
            config.hooks(HookStage::PostSetup),
            vec!["npm install", "npm run seed"]
        );
        assert!(config.hooks(HookStage::PreCleanup).is_empty());
        assert_eq!(config.copies()[0].destination(), ".env");
        assert_eq!(config.copies()[1].destination(), "config/local.json");
        assert_eq!(config.open_commands(), ["code {worktree}"]);
    }

    #[test]
    fn empty_config_uses_defaults_and_disables_optional_sections() {
        let config = Config::parse("", &root()).unwrap();
        assert_eq!(config.project_name(), "shop");
        assert_eq!(config.main_branch(), "main");
        assert_eq!(config.worktree_root(), PathBuf::from("/work"));
        assert_eq!(config.database().backend, "postgres");
        assert_eq!(config.database_prefix(), "shop");
        assert_eq!(config.ports(), PortsSection::default());
        assert!(config.migrations().is_none());
        assert!(config.storage().is_none());
        assert!(config.browser().is_none());
        assert!(config.registry_path().is_none());
        assert!(config.build_command().is_none());
        assert_eq!(config.tracker_backend(), "github");
    }

    #[test]
    fn load_without_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert!(config.migrations().is_none());
        assert_eq!(config.get("database.host", "fallback"), "fallback");
    }

    #[test]
    fn load_reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[project]\nname = \"demo-app\"\n",
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.project_name(), "demo-app");
        assert_eq!(config.database_prefix(), "demo_app");
    }

    #[test]
    fn get_and_get_array_walk_key_paths() {
        let config = Config::parse(
            r#"
[database]
host = "db.internal"
port = 6543

[storage]
backend = "s3"
containers = ["a-{env}", "b-{env}"]
"#,
            &root(),
        )
        .unwrap();
        assert_eq!(config.get("database.host", "localhost"), "db.internal");
        assert_eq!(config.get("database.port", "5432"), "6543");
        assert_eq!(config.get("database.user", "postgres"), "postgres");
        assert_eq!(config.get("nope.deeper.key", "d"), "d");
        assert_eq!(config.get_array("storage.containers"), ["a-{env}", "b-{env}"]);
        assert_eq!(config.get_array("storage.backend"), ["s3"]);
        assert!(config.get_array("storage.missing").is_empty());
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = Config::parse("[database]\nhots = \"x\"\n", &root()).unwrap_err();
        assert!(err.to_string().starts_with("failed to parse config"));
    }

    #[test]
    fn rejects_unknown_hook_stage() {
        assert!(Config::parse("[hooks]\npost-deploy = \"x\"\n", &root()).is_err());
    }

    #[test]
    fn script_migrations_require_command() {
        let err = Config::parse("[migrations]\ntool = \"script\"\n", &root()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey(ref k) if k == "migrations.command"));
    }

    #[test]
    fn rejects_port_base_without_headroom() {
        let err = Config::parse("[ports]\nhttps = 65500\n", &root()).unwrap_err();
        assert!(err.to_string().starts_with("configuration error:"));
    }

    #[test]
    fn absolute_worktree_root_is_kept() {
        let config = Config::parse("[project]\nworktree_root = \"/srv/trees\"\n", &root()).unwrap();
        assert_eq!(config.worktree_root(), PathBuf::from("/srv/trees"));
    }

    #[test]
    fn expand_tilde_uses_home() {
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(expand_tilde("~/x.json"), PathBuf::from(home).join("x.json"));
        }
        assert_eq!(expand_tilde("/abs/x.json"), PathBuf::from("/abs/x.json"));
    }
}
