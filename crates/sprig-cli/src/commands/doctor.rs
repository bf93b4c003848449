use super::{EXIT_FAILURE, EXIT_SUCCESS};
use sprig_adapters::{check_prereqs, command_exists, DebugRegistry};
use sprig_core::{state_dir, Adapters, Git, NoTracker, ProjectLock, Resolver, Vcs};
use sprig_schema::Config;
use std::path::Path;

pub fn run(dir: &Path, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    if command_exists("git") {
        checks.push(Check::pass("git", "git is installed"));
    } else {
        all_pass = false;
        checks.push(Check::fail("git", "git is not installed"));
        return print_results(&checks, all_pass, json_output);
    }

    let vcs = match Git::discover(dir) {
        Ok(vcs) => {
            checks.push(Check::pass(
                "repository",
                &format!("Repository at {}", vcs.main_root().display()),
            ));
            vcs
        }
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail("repository", &format!("Not a git repository: {e}")));
            return print_results(&checks, all_pass, json_output);
        }
    };

    match Config::load(vcs.main_root()) {
        Ok(config) => {
            checks.push(Check::pass(
                "config",
                &format!("Configuration valid (project '{}')", config.project_name()),
            ));
            check_config(&config, &vcs, &mut checks, &mut all_pass);
        }
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail("config", &e.to_string()));
        }
    }

    print_results(&checks, all_pass, json_output)
}

fn check_config(config: &Config, vcs: &Git, checks: &mut Vec<Check>, all_pass: &mut bool) {
    // Tools
    let missing = check_prereqs(config);
    if missing.is_empty() {
        checks.push(Check::pass("prereqs", "Tools for the configured backends are installed"));
    } else {
        *all_pass = false;
        let names: Vec<&str> = missing.iter().map(|m| m.name).collect();
        checks.push(Check::fail(
            "prereqs",
            &format!("Missing tools: {}", names.join(", ")),
        ));
    }

    // Backends
    let state = match state_dir(vcs) {
        Ok(state) => state,
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("state_dir", &format!("Cannot locate state directory: {e}")));
            return;
        }
    };
    if let Err(e) = Adapters::from_config(config, &state) {
        *all_pass = false;
        checks.push(Check::fail("backends", &e.to_string()));
    } else {
        checks.push(Check::pass("backends", "Configured backends are known"));
    }

    // Lock
    let lock_path = ProjectLock::path(&state);
    match ProjectLock::try_acquire(&lock_path) {
        Ok(Some(_)) => checks.push(Check::pass("lock", "Project lock is free")),
        Ok(None) => {
            let holder = ProjectLock::holder(&lock_path)
                .map_or_else(|| "another sprig process".to_owned(), |pid| format!("sprig process {pid}"));
            checks.push(Check::warn(
                "lock",
                &format!("Project lock is held by {holder}"),
            ));
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("lock", &format!("Cannot check project lock: {e}")));
        }
    }

    // Registry
    if let Some(path) = config.registry_path() {
        match DebugRegistry::new(&path).list() {
            Ok(endpoints) => checks.push(Check::info(
                "registry",
                &format!("{} debug endpoint(s) registered in {}", endpoints.len(), path.display()),
            )),
            Err(e) => checks.push(Check::warn("registry", &e.to_string())),
        }
    }

    // Environments
    match Resolver::new(config, vcs, &NoTracker).live() {
        Ok(live) => checks.push(Check::info(
            "environments",
            &format!("{} live environment(s)", live.len()),
        )),
        Err(e) => checks.push(Check::warn(
            "environments",
            &format!("Cannot list environments: {e}"),
        )),
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("sprig doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outside_a_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(run(dir.path(), true).unwrap(), EXIT_FAILURE);
    }
}
