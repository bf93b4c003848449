use super::{colorize_presence, describe, json_pretty, Project, EXIT_SUCCESS};
use sprig_core::Silent;
use std::path::Path;

pub fn run(dir: &Path, json: bool) -> Result<u8, String> {
    let project = Project::open(dir)?;
    let orchestrator = project.orchestrator(&Silent)?;
    let envs = orchestrator.list().map_err(|e| describe(&e))?;
    if json {
        println!("{}", json_pretty(&envs)?);
    } else if envs.is_empty() {
        println!("no environments found");
    } else {
        println!(
            "{:<24} {:<6} {:<6} {:<6} {:<6} {:<28} DB",
            "NAME", "HTTPS", "HTTP", "VITE", "DEBUG", "DATABASE"
        );
        for env in &envs {
            let port = |p: Option<u16>| p.map_or_else(|| "-".to_owned(), |p| p.to_string());
            println!(
                "{:<24} {:<6} {:<6} {:<6} {:<6} {:<28} {}",
                env.name,
                port(env.ports.map(|p| p.https)),
                port(env.ports.map(|p| p.http)),
                port(env.ports.map(|p| p.vite)),
                port(env.debug_port),
                env.database,
                colorize_presence(env.database_exists),
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
