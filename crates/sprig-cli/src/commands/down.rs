use super::{describe, json_pretty, Progress, Project, EXIT_SUCCESS};
use dialoguer::Confirm;
use sprig_core::{CoreError, DownOutcome};
use std::io::{stdin, stdout, IsTerminal};
use std::path::Path;

pub fn run(dir: &Path, query: &str, force: bool, json: bool) -> Result<u8, String> {
    let project = Project::open(dir)?;
    let progress = Progress::new(json);
    let orchestrator = project.orchestrator(&progress)?;

    let outcome = match orchestrator.down(query, force) {
        Err(CoreError::Unsafe { env, reason }) if !json && interactive() => {
            let proceed = Confirm::new()
                .with_prompt(format!("'{env}' {reason}. tear it down anyway?"))
                .default(false)
                .interact()
                .map_err(|e| format!("prompt failed: {e}"))?;
            if !proceed {
                return Err(describe(&CoreError::Unsafe { env, reason }));
            }
            orchestrator.down(query, true).map_err(|e| describe(&e))?
        }
        other => other.map_err(|e| describe(&e))?,
    };

    match outcome {
        DownOutcome::NotFound(query) => {
            if json {
                let value = serde_json::json!({ "removed": false, "query": query });
                println!("{}", json_pretty(&value)?);
            }
        }
        DownOutcome::Removed(report) => {
            if json {
                println!("{}", json_pretty(&report)?);
            } else {
                println!("environment '{}' removed", report.env.name);
                if !report.warnings.is_empty() {
                    println!("{} resource(s) need manual cleanup", report.warnings.len());
                }
            }
        }
    }
    Ok(EXIT_SUCCESS)
}

fn interactive() -> bool {
    stdin().is_terminal() && stdout().is_terminal()
}
