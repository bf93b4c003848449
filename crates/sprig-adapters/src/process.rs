use crate::exec::{capture, failure, run_tool};
use crate::AdapterError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub command: String,
    /// Argument vector, from `/proc/<pid>/cmdline` where available.
    pub args: Vec<String>,
}

impl ProcessInfo {
    /// Whether one argument is exactly `arg`.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Whether `flag` is immediately followed by exactly `value`.
    pub fn has_option(&self, flag: &str, value: &str) -> bool {
        self.args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }
}

/// Host process control: detached spawns and token-based lookup/signalling.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessHost;

impl ProcessHost {
    pub fn new() -> Self {
        Self
    }

    /// Start `program` detached from this process (own process group, no
    /// inherited stdio) and return its pid.
    pub fn spawn_detached(&self, program: &str, args: &[String]) -> Result<u32, AdapterError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AdapterError::ToolUnavailable {
                    tool: program.to_owned(),
                    hint: crate::prereq::install_hint(program).to_owned(),
                }
            } else {
                AdapterError::Io(e)
            }
        })?;
        debug!("spawned {program} (pid {})", child.id());
        Ok(child.id())
    }

    /// Processes whose full command line contains `token`. This is a
    /// substring match; callers narrow it down with [`ProcessInfo::args`].
    pub fn find(&self, token: &str) -> Result<Vec<ProcessInfo>, AdapterError> {
        let pattern = escape_pattern(token);
        let output = capture("pgrep", Command::new("pgrep").args(["-a", "-f", "--", &pattern]))?;
        match output.status.code() {
            Some(0) => Ok(parse_pgrep(&String::from_utf8_lossy(&output.stdout))
                .into_iter()
                .map(with_proc_args)
                .collect()),
            // 1: nothing matched
            Some(1) => Ok(Vec::new()),
            _ => Err(failure("pgrep", &output)),
        }
    }

    /// Send SIGTERM to every process with an argument exactly equal to
    /// `arg`. Returns how many were signalled; zero is not an error.
    pub fn signal(&self, arg: &str) -> Result<usize, AdapterError> {
        self.signal_where(arg, |p| p.has_arg(arg))
    }

    /// Send SIGTERM to the processes matching `token` that `keep` accepts.
    pub fn signal_where(
        &self,
        token: &str,
        keep: impl Fn(&ProcessInfo) -> bool,
    ) -> Result<usize, AdapterError> {
        let procs: Vec<ProcessInfo> = self.find(token)?.into_iter().filter(&keep).collect();
        if procs.is_empty() {
            return Ok(0);
        }
        let pids: Vec<String> = procs.iter().map(|p| p.pid.to_string()).collect();
        debug!("sending SIGTERM to {}", pids.join(", "));
        run_tool("kill", Command::new("kill").arg("-TERM").args(&pids))?;
        Ok(procs.len())
    }
}

/// `pgrep` takes an extended regex; match `token` literally.
fn escape_pattern(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    for c in token.chars() {
        if "\\.^$|?*+()[]{}".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn parse_pgrep(stdout: &str) -> Vec<ProcessInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let (pid, command) = line.trim().split_once(' ')?;
            Some(ProcessInfo {
                pid: pid.parse().ok()?,
                command: command.to_owned(),
                args: command.split_whitespace().map(str::to_owned).collect(),
            })
        })
        .collect()
}

/// Replace the whitespace-split arguments with the real argv, which keeps
/// paths containing spaces intact.
fn with_proc_args(mut info: ProcessInfo) -> ProcessInfo {
    if let Ok(raw) = fs::read(format!("/proc/{}/cmdline", info.pid)) {
        let args: Vec<String> = raw
            .split(|b| *b == 0)
            .filter(|a| !a.is_empty())
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();
        if !args.is_empty() {
            info.args = args;
        }
    }
    info
}

/// One registered browser debug endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DebugEndpoint {
    pub project: String,
    pub env: String,
    pub port: u16,
    pub backend: String,
    pub worktree: PathBuf,
    pub registered_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    endpoints: BTreeMap<String, DebugEndpoint>,
    /// Keys written by other tools sharing the document.
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

/// Host-level JSON document mapping `<project>/<env>` to debug endpoints.
///
/// Every mutation is a read-modify-write with an atomic replace; a missing
/// document reads as empty.
pub struct DebugRegistry {
    path: PathBuf,
}

impl DebugRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key(project: &str, env: &str) -> String {
        format!("{project}/{env}")
    }

    fn read(&self) -> Result<RegistryDocument, AdapterError> {
        if !self.path.exists() {
            return Ok(RegistryDocument::default());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(RegistryDocument::default());
        }
        serde_json::from_str(&content).map_err(|e| {
            AdapterError::Registry(format!("{} is not valid JSON: {e}", self.path.display()))
        })
    }

    fn write(&self, doc: &RegistryDocument) -> Result<(), AdapterError> {
        let dir = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(doc)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| AdapterError::Io(e.error))?;
        Ok(())
    }

    pub fn register(&self, endpoint: DebugEndpoint) -> Result<(), AdapterError> {
        let mut doc = self.read()?;
        doc.endpoints
            .insert(Self::key(&endpoint.project, &endpoint.env), endpoint);
        self.write(&doc)
    }

    /// Remove an endpoint. Returns whether one was registered.
    pub fn unregister(&self, project: &str, env: &str) -> Result<bool, AdapterError> {
        if !self.path.exists() {
            return Ok(false);
        }
        let mut doc = self.read()?;
        let removed = doc.endpoints.remove(&Self::key(project, env)).is_some();
        if removed {
            self.write(&doc)?;
        }
        Ok(removed)
    }

    pub fn get(&self, project: &str, env: &str) -> Result<Option<DebugEndpoint>, AdapterError> {
        Ok(self.read()?.endpoints.remove(&Self::key(project, env)))
    }

    pub fn list(&self) -> Result<Vec<DebugEndpoint>, AdapterError> {
        Ok(self.read()?.endpoints.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(env: &str, port: u16) -> DebugEndpoint {
        DebugEndpoint {
            project: "shop".to_owned(),
            env: env.to_owned(),
            port,
            backend: "chrome".to_owned(),
            worktree: PathBuf::from(format!("/work/shop-{env}")),
            registered_at: "2024-01-01T00:00:00Z".to_owned(),
        }
    }

    #[test]
    fn missing_registry_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = DebugRegistry::new(dir.path().join("none.json"));
        assert!(reg.list().unwrap().is_empty());
        assert!(!reg.unregister("shop", "x").unwrap());
        assert!(!dir.path().join("none.json").exists());
    }

    #[test]
    fn register_get_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let reg = DebugRegistry::new(dir.path().join("nested/debug.json"));
        reg.register(endpoint("feature", 9272)).unwrap();
        reg.register(endpoint("other", 9273)).unwrap();

        assert_eq!(reg.get("shop", "feature").unwrap().unwrap().port, 9272);
        assert_eq!(reg.list().unwrap().len(), 2);

        assert!(reg.unregister("shop", "feature").unwrap());
        assert!(reg.get("shop", "feature").unwrap().is_none());
        assert_eq!(reg.list().unwrap().len(), 1);
    }

    #[test]
    fn foreign_keys_survive_read_modify_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.json");
        fs::write(&path, r#"{"version": 3, "mcpServers": {"x": {}}}"#).unwrap();

        let reg = DebugRegistry::new(&path);
        reg.register(endpoint("feature", 9272)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 3);
        assert!(raw["mcpServers"]["x"].is_object());
        assert_eq!(raw["endpoints"]["shop/feature"]["port"], 9272);
    }

    #[test]
    fn corrupt_registry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.json");
        fs::write(&path, "{not json").unwrap();
        let err = DebugRegistry::new(&path).list().unwrap_err();
        assert!(matches!(err, AdapterError::Registry(_)));
    }

    #[test]
    fn parse_pgrep_lines() {
        let procs = parse_pgrep("123 /usr/bin/chrome --remote-debugging-port=9222\n456 firefox\n");
        assert_eq!(procs.len(), 2);
        assert_eq!(procs[0].pid, 123);
        assert!(procs[0].command.contains("9222"));
        assert_eq!(procs[1].command, "firefox");
        assert_eq!(procs[0].args[1], "--remote-debugging-port=9222");
    }

    #[test]
    fn exact_argument_matching() {
        let info = parse_pgrep("7 chrome --user-data-dir=/p/fix-bug-861 -profile /p/firefox-a1\n")
            .remove(0);
        assert!(info.has_arg("--user-data-dir=/p/fix-bug-861"));
        assert!(!info.has_arg("--user-data-dir=/p/fix-bug-86"));
        assert!(info.has_option("-profile", "/p/firefox-a1"));
        assert!(!info.has_option("-profile", "/p/firefox-a"));
    }

    #[test]
    fn pattern_metacharacters_are_escaped() {
        assert_eq!(escape_pattern("/tmp/a.b+c"), "/tmp/a\\.b\\+c");
        assert_eq!(escape_pattern("plain-token"), "plain-token");
    }

    #[test]
    fn signal_without_matches_is_zero() {
        if !crate::prereq::command_exists("pgrep") {
            return;
        }
        let host = ProcessHost::new();
        assert_eq!(host.signal("sprig-no-such-process-token-7f3a").unwrap(), 0);
    }
}
