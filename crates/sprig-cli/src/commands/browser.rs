use super::{describe, json_pretty, Progress, Project, EXIT_SUCCESS};
use std::path::Path;

pub fn run(dir: &Path, query: &str, json: bool) -> Result<u8, String> {
    let project = Project::open(dir)?;
    let progress = Progress::new(json);
    let orchestrator = project.orchestrator(&progress)?;
    let session = orchestrator.browser(query).map_err(|e| describe(&e))?;
    if json {
        println!("{}", json_pretty(&session)?);
    } else {
        println!(
            "browser for '{}' on debug port {}: {}",
            session.env, session.debug_port, session.url
        );
    }
    Ok(EXIT_SUCCESS)
}
