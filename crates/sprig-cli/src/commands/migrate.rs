use super::{describe, json_pretty, Progress, Project, EXIT_SUCCESS};
use sprig_core::{MigrateAction, MigrateOutcome};
use std::path::Path;

pub fn run(dir: &Path, query: &str, action: &MigrateAction, json: bool) -> Result<u8, String> {
    let project = Project::open(dir)?;
    let progress = Progress::new(json);
    let orchestrator = project.orchestrator(&progress)?;
    let outcome = orchestrator
        .migrate(query, action)
        .map_err(|e| describe(&e))?;

    let (value, text) = match outcome {
        MigrateOutcome::NotSupported(tool) => {
            return Err(format!(
                "migration tool '{tool}' does not support '{}'",
                action_name(action)
            ));
        }
        MigrateOutcome::Applied => (
            serde_json::json!({ "applied": true }),
            "migrations applied".to_owned(),
        ),
        MigrateOutcome::Added(name) => (
            serde_json::json!({ "added": name }),
            format!("migration '{name}' created"),
        ),
        MigrateOutcome::Removed => (
            serde_json::json!({ "removed": true }),
            "latest migration reverted".to_owned(),
        ),
        MigrateOutcome::Listed(names) => {
            let text = if names.is_empty() {
                "no migrations".to_owned()
            } else {
                names.join("\n")
            };
            (serde_json::json!({ "migrations": names }), text)
        }
    };
    if json {
        println!("{}", json_pretty(&value)?);
    } else {
        println!("{text}");
    }
    Ok(EXIT_SUCCESS)
}

fn action_name(action: &MigrateAction) -> &'static str {
    match action {
        MigrateAction::Run => "run",
        MigrateAction::Add(_) => "add",
        MigrateAction::Remove => "remove",
        MigrateAction::List => "list",
    }
}
