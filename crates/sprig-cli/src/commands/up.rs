use super::{json_pretty, Progress, Project, EXIT_SUCCESS};
use sprig_core::UpOptions;
use std::path::Path;

pub fn run(dir: &Path, name: &str, open: Option<Option<String>>, json: bool) -> Result<u8, String> {
    let project = Project::open(dir)?;
    let progress = Progress::new(json);
    let orchestrator = project.orchestrator(&progress)?;
    let options = UpOptions {
        open: open.is_some(),
        open_command: open.flatten(),
    };
    let report = orchestrator
        .up(name, &options)
        .map_err(|e| super::describe(&e))?;

    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }
    println!();
    println!("environment '{}' is ready", report.env.name);
    println!("  branch:    {}", report.env.branch);
    println!("  worktree:  {}", report.env.worktree.display());
    println!(
        "  ports:     https {}  http {}  vite {}",
        report.ports.https, report.ports.http, report.ports.vite
    );
    println!("  database:  {}", report.database);
    if !report.containers.is_empty() {
        println!("  storage:   {}", report.containers.join(", "));
    }
    if let Some(port) = report.debug_port {
        let state = if report.browser_started {
            "running"
        } else {
            "not started"
        };
        println!("  browser:   debug port {port} ({state})");
    }
    if !report.warnings.is_empty() {
        println!(
            "{} warning(s); the steps above marked ⚠ need attention",
            report.warnings.len()
        );
    }
    Ok(EXIT_SUCCESS)
}
