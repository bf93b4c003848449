use crate::identity::Environment;
use crate::ports::PortSet;
use crate::CoreError;
use sprig_adapters::exec::{run_tool, shell};
use sprig_schema::{expand, Config, HookStage, Vars};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Everything a hook, build command or template can see about one
/// environment.
#[derive(Debug, Clone)]
pub struct EnvContext {
    pub env: Environment,
    /// Checkout the command was started from.
    pub source: PathBuf,
    pub database: String,
    pub ports: PortSet,
    pub debug_port: u16,
}

impl EnvContext {
    /// Placeholder values for `{...}` expansion.
    pub fn vars(&self) -> Vars {
        Vars::new()
            .with("env", &self.env.name)
            .with("branch", &self.env.branch)
            .with("worktree", self.env.worktree.display())
            .with("https_port", self.ports.https)
            .with("http_port", self.ports.http)
            .with("vite_port", self.ports.vite)
            .with("debug_port", self.debug_port)
    }

    /// `SPRIG_*` variables exported to hooks and build commands.
    pub fn process_env(&self) -> Vec<(String, String)> {
        [
            ("SPRIG_ENV", self.env.name.to_string()),
            ("SPRIG_BRANCH", self.env.branch.to_string()),
            ("SPRIG_WORKTREE", self.env.worktree.display().to_string()),
            ("SPRIG_SOURCE", self.source.display().to_string()),
            ("SPRIG_DATABASE", self.database.clone()),
            ("SPRIG_HTTPS_PORT", self.ports.https.to_string()),
            ("SPRIG_HTTP_PORT", self.ports.http.to_string()),
            ("SPRIG_VITE_PORT", self.ports.vite.to_string()),
            ("SPRIG_DEBUG_PORT", self.debug_port.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
    }

    pub fn expand(&self, template: &str) -> String {
        expand(template, &self.vars())
    }

    /// Run `command` through `sh -c` in `cwd` with the environment exported.
    pub fn run_command(&self, what: &str, command: &str, cwd: &Path) -> Result<(), CoreError> {
        let expanded = self.expand(command);
        debug!("{what}: {expanded}");
        let output = run_tool(what, &mut shell(&expanded, cwd, &self.process_env()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("{what} output:\n{}", stdout.trim_end());
        }
        Ok(())
    }
}

/// Run every command configured for `stage`, in order, stopping at the first
/// failure. Returns how many commands ran.
pub fn run_hooks(
    config: &Config,
    stage: HookStage,
    cwd: &Path,
    ctx: &EnvContext,
) -> Result<usize, CoreError> {
    let commands = config.hooks(stage);
    let what = format!("{stage} hook");
    for command in &commands {
        ctx.run_command(&what, command, cwd)?;
    }
    if !commands.is_empty() {
        info!("{stage}: ran {} command(s) for {}", commands.len(), ctx.env.name);
    }
    Ok(commands.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprig_schema::{BranchName, EnvName};
    use std::fs;

    fn ctx(dir: &Path) -> EnvContext {
        EnvContext {
            env: Environment {
                name: EnvName::parse("fix-bug-86").unwrap(),
                branch: BranchName::new("fix/bug-86"),
                worktree: dir.to_path_buf(),
            },
            source: dir.to_path_buf(),
            database: "shop_fix_bug_86".to_owned(),
            ports: PortSet {
                offset: 86,
                https: 3086,
                http: 4086,
                vite: 5259,
            },
            debug_port: 9308,
        }
    }

    #[test]
    fn placeholders_expand() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        assert_eq!(
            c.expand("https://localhost:{https_port}/{env}?b={branch}"),
            "https://localhost:3086/fix-bug-86?b=fix/bug-86"
        );
        assert_eq!(c.expand("{unknown}"), "{unknown}");
    }

    #[test]
    fn hooks_see_sprig_environment() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::parse(
            r#"
[hooks]
post-setup = ["echo $SPRIG_ENV:$SPRIG_HTTPS_PORT:$SPRIG_DATABASE > hook.out"]
"#,
            dir.path(),
        )
        .unwrap();
        let ran = run_hooks(&config, HookStage::PostSetup, dir.path(), &ctx(dir.path())).unwrap();
        assert_eq!(ran, 1);
        let out = fs::read_to_string(dir.path().join("hook.out")).unwrap();
        assert_eq!(out.trim(), "fix-bug-86:3086:shop_fix_bug_86");
    }

    #[test]
    fn hook_list_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::parse(
            r#"
[hooks]
pre-setup = ["touch one", "exit 3", "touch three"]
"#,
            dir.path(),
        )
        .unwrap();
        let err = run_hooks(&config, HookStage::PreSetup, dir.path(), &ctx(dir.path()));
        assert!(err.is_err());
        assert!(dir.path().join("one").exists());
        assert!(!dir.path().join("three").exists());
    }

    #[test]
    fn unconfigured_stage_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::parse("", dir.path()).unwrap();
        assert_eq!(
            run_hooks(&config, HookStage::PreCleanup, dir.path(), &ctx(dir.path())).unwrap(),
            0
        );
    }
}
