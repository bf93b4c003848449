use crate::process::ProcessHost;
use crate::AdapterError;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the attach configuration sprig owns inside `.vscode/launch.json`.
pub const DEBUG_CONFIG_NAME: &str = "sprig debug";

const CHROME_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

/// First Chrome-family executable found on `PATH`.
pub fn chrome_binary() -> Option<&'static str> {
    CHROME_CANDIDATES
        .iter()
        .copied()
        .find(|c| crate::prereq::command_exists(c))
}

pub trait BrowserBackend: Send + Sync {
    fn name(&self) -> &str;

    /// `Some(reason)` when a running instance would prevent a debug session.
    fn check_conflicts(&self) -> Result<Option<String>, AdapterError>;

    fn start(&self, env: &str, debug_port: u16, start_url: &str) -> Result<(), AdapterError>;

    /// Stop the environment's browser. No matching process is not an error.
    fn stop(&self, env: &str) -> Result<(), AdapterError>;

    /// `type` field of the editor attach configuration.
    fn debug_config_type(&self) -> &str {
        "chrome"
    }

    /// Insert or replace the `sprig debug` attach entry in
    /// `<dir>/.vscode/launch.json`.
    fn update_debug_config(&self, dir: &Path, port: u16) -> Result<(), AdapterError> {
        let path = launch_json(dir);
        let mut doc = read_launch(&path)?.unwrap_or_else(|| json!({ "version": "0.2.0" }));
        let entry = json!({
            "name": DEBUG_CONFIG_NAME,
            "type": self.debug_config_type(),
            "request": "attach",
            "port": port,
            "webRoot": "${workspaceFolder}",
        });
        let configs = configurations(&mut doc, &path)?;
        configs.retain(|c| !is_sprig_entry(c));
        configs.push(entry);
        write_launch(&path, &doc)?;
        debug!("debug config for port {port} written to {}", path.display());
        Ok(())
    }

    /// Remove the `sprig debug` entry. Returns whether one was present.
    fn clean_debug_config(&self, dir: &Path) -> Result<bool, AdapterError> {
        let path = launch_json(dir);
        let Some(mut doc) = read_launch(&path)? else {
            return Ok(false);
        };
        let configs = configurations(&mut doc, &path)?;
        let before = configs.len();
        configs.retain(|c| !is_sprig_entry(c));
        if configs.len() == before {
            return Ok(false);
        }
        write_launch(&path, &doc)?;
        Ok(true)
    }
}

pub fn select_browser(name: &str, state_dir: &Path) -> Result<Box<dyn BrowserBackend>, AdapterError> {
    let profiles = state_dir.join("browser-profiles");
    match name {
        "chrome" => Ok(Box::new(ChromeBackend::new(profiles))),
        "firefox" => Ok(Box::new(FirefoxBackend::new(profiles))),
        "mock" => Ok(Box::new(crate::mock::MockBrowser::with_root(state_dir))),
        other => Err(AdapterError::UnknownBackend {
            family: "browser",
            name: other.to_owned(),
            expected: "chrome, firefox, mock",
        }),
    }
}

fn launch_json(dir: &Path) -> PathBuf {
    dir.join(".vscode").join("launch.json")
}

fn read_launch(path: &Path) -> Result<Option<Value>, AdapterError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map(Some).map_err(|e| {
        AdapterError::Registry(format!("{} is not plain JSON: {e}", path.display()))
    })
}

fn write_launch(path: &Path, doc: &Value) -> Result<(), AdapterError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(doc)? + "\n")?;
    Ok(())
}

fn configurations<'a>(doc: &'a mut Value, path: &Path) -> Result<&'a mut Vec<Value>, AdapterError> {
    let obj = doc.as_object_mut().ok_or_else(|| {
        AdapterError::Registry(format!("{} is not a JSON object", path.display()))
    })?;
    obj.entry("configurations")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| {
            AdapterError::Registry(format!("{}: 'configurations' is not an array", path.display()))
        })
}

fn is_sprig_entry(config: &Value) -> bool {
    config.get("name").and_then(Value::as_str) == Some(DEBUG_CONFIG_NAME)
}

/// Chrome/Chromium with one isolated profile directory per environment.
pub struct ChromeBackend {
    profiles: PathBuf,
    host: ProcessHost,
}

impl ChromeBackend {
    pub fn new(profiles: PathBuf) -> Self {
        Self {
            profiles,
            host: ProcessHost::new(),
        }
    }

    fn profile_dir(&self, env: &str) -> PathBuf {
        self.profiles.join(env)
    }

    fn args(&self, env: &str, debug_port: u16, start_url: &str) -> Vec<String> {
        vec![
            format!("--remote-debugging-port={debug_port}"),
            format!("--user-data-dir={}", self.profile_dir(env).display()),
            "--no-first-run".to_owned(),
            "--no-default-browser-check".to_owned(),
            start_url.to_owned(),
        ]
    }
}

impl BrowserBackend for ChromeBackend {
    fn name(&self) -> &'static str {
        "chrome"
    }

    fn check_conflicts(&self) -> Result<Option<String>, AdapterError> {
        // Every session gets its own --user-data-dir, so a regular Chrome
        // window never captures the debug instance.
        Ok(None)
    }

    fn start(&self, env: &str, debug_port: u16, start_url: &str) -> Result<(), AdapterError> {
        let binary = chrome_binary().ok_or_else(|| AdapterError::ToolUnavailable {
            tool: "google-chrome".to_owned(),
            hint: crate::prereq::install_hint("google-chrome").to_owned(),
        })?;
        fs::create_dir_all(self.profile_dir(env))?;
        let pid = self
            .host
            .spawn_detached(binary, &self.args(env, debug_port, start_url))?;
        info!("chrome started for {env} on debug port {debug_port} (pid {pid})");
        Ok(())
    }

    fn stop(&self, env: &str) -> Result<(), AdapterError> {
        let token = format!("--user-data-dir={}", self.profile_dir(env).display());
        let stopped = self.host.signal(&token)?;
        debug!("stopped {stopped} chrome process(es) for {env}");
        Ok(())
    }
}

/// Firefox with the remote debugger server enabled.
pub struct FirefoxBackend {
    profiles: PathBuf,
    host: ProcessHost,
}

impl FirefoxBackend {
    pub fn new(profiles: PathBuf) -> Self {
        Self {
            profiles,
            host: ProcessHost::new(),
        }
    }

    fn profile_dir(&self, env: &str) -> PathBuf {
        self.profiles.join(format!("firefox-{env}"))
    }
}

/// A running Firefox blocks a new debug instance unless it was started with
/// `-no-remote` or is itself a debug instance.
fn firefox_blocks(command: &str) -> bool {
    !command.contains("-no-remote") && !command.contains("--start-debugger-server")
}

impl BrowserBackend for FirefoxBackend {
    fn name(&self) -> &'static str {
        "firefox"
    }

    fn debug_config_type(&self) -> &'static str {
        "firefox"
    }

    fn check_conflicts(&self) -> Result<Option<String>, AdapterError> {
        let blocking: Vec<_> = self
            .host
            .find("firefox")?
            .into_iter()
            .filter(|p| firefox_blocks(&p.command))
            .collect();
        Ok(blocking.first().map(|p| {
            format!(
                "firefox is already running without -no-remote (pid {}); close it to start a debug session",
                p.pid
            )
        }))
    }

    fn start(&self, env: &str, debug_port: u16, start_url: &str) -> Result<(), AdapterError> {
        let profile = self.profile_dir(env);
        fs::create_dir_all(&profile)?;
        let args = vec![
            "-no-remote".to_owned(),
            "-profile".to_owned(),
            profile.display().to_string(),
            "--start-debugger-server".to_owned(),
            debug_port.to_string(),
            start_url.to_owned(),
        ];
        let pid = self.host.spawn_detached("firefox", &args)?;
        info!("firefox started for {env} on debug port {debug_port} (pid {pid})");
        Ok(())
    }

    fn stop(&self, env: &str) -> Result<(), AdapterError> {
        let profile = self.profile_dir(env).display().to_string();
        let stopped = self
            .host
            .signal_where(&profile, |p| p.has_option("-profile", &profile))?;
        debug!("stopped {stopped} firefox process(es) for {env}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBrowser;

    #[test]
    fn select_browser_backends() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(select_browser("chrome", dir.path()).unwrap().name(), "chrome");
        assert_eq!(select_browser("firefox", dir.path()).unwrap().name(), "firefox");
        assert_eq!(select_browser("mock", dir.path()).unwrap().name(), "mock");
        let err = select_browser("safari", dir.path()).err().unwrap();
        assert!(err.to_string().starts_with("configuration error:"));
    }

    #[test]
    fn chrome_args_isolate_profile_per_env() {
        let chrome = ChromeBackend::new(PathBuf::from("/state/browser-profiles"));
        let args = chrome.args("feature", 9272, "https://localhost:3072");
        assert!(args.contains(&"--remote-debugging-port=9272".to_owned()));
        assert!(args.contains(&"--user-data-dir=/state/browser-profiles/feature".to_owned()));
        assert_eq!(args.last().unwrap(), "https://localhost:3072");
    }

    fn spawn_stand_in(profile_arg: &str) -> std::process::Child {
        std::process::Command::new("sh")
            .args(["-c", "sleep 30; true", profile_arg])
            .spawn()
            .unwrap()
    }

    fn wait_until_listed(token: &str) {
        let host = ProcessHost::new();
        for _ in 0..100 {
            if host.find(token).unwrap().iter().any(|p| p.has_arg(token)) {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        panic!("{token} never showed up in the process list");
    }

    #[test]
    fn chrome_stop_leaves_environments_sharing_a_prefix_running() {
        if !crate::prereq::command_exists("pgrep") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let profiles = dir.path().join("browser-profiles");
        let chrome = ChromeBackend::new(profiles.clone());
        let own = format!("--user-data-dir={}", profiles.join("fix-bug-86").display());
        let sibling = format!("--user-data-dir={}", profiles.join("fix-bug-861").display());

        let mut own_proc = spawn_stand_in(&own);
        let mut sibling_proc = spawn_stand_in(&sibling);
        wait_until_listed(&own);
        wait_until_listed(&sibling);

        chrome.stop("fix-bug-86").unwrap();
        let status = own_proc.wait().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));
        let sibling_state = sibling_proc.try_wait().unwrap();
        let _ = sibling_proc.kill();
        let _ = sibling_proc.wait();

        assert!(!status.success());
        assert!(sibling_state.is_none(), "fix-bug-861 was stopped too");
    }

    #[test]
    fn chrome_never_conflicts() {
        let chrome = ChromeBackend::new(PathBuf::from("/tmp"));
        assert!(chrome.check_conflicts().unwrap().is_none());
    }

    #[test]
    fn firefox_conflict_heuristic() {
        assert!(firefox_blocks("/usr/lib/firefox/firefox"));
        assert!(!firefox_blocks("firefox -no-remote -profile /tmp/p"));
        assert!(!firefox_blocks("firefox --start-debugger-server 9222"));
    }

    #[test]
    fn debug_config_is_inserted_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let browser = MockBrowser::with_root(dir.path());
        browser.update_debug_config(dir.path(), 9222).unwrap();
        browser.update_debug_config(dir.path(), 9230).unwrap();

        let doc: Value =
            serde_json::from_str(&fs::read_to_string(launch_json(dir.path())).unwrap()).unwrap();
        let configs = doc["configurations"].as_array().unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0]["port"], 9230);
        assert_eq!(configs[0]["request"], "attach");
    }

    #[test]
    fn debug_config_keeps_foreign_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".vscode")).unwrap();
        fs::write(
            launch_json(dir.path()),
            r#"{"version":"0.2.0","configurations":[{"name":"server","type":"node"}]}"#,
        )
        .unwrap();

        let browser = MockBrowser::with_root(dir.path());
        browser.update_debug_config(dir.path(), 9222).unwrap();
        assert!(browser.clean_debug_config(dir.path()).unwrap());
        assert!(!browser.clean_debug_config(dir.path()).unwrap());

        let doc: Value =
            serde_json::from_str(&fs::read_to_string(launch_json(dir.path())).unwrap()).unwrap();
        let configs = doc["configurations"].as_array().unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0]["name"], "server");
    }

    #[test]
    fn clean_without_launch_json_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let browser = MockBrowser::with_root(dir.path());
        assert!(!browser.clean_debug_config(dir.path()).unwrap());
    }
}
