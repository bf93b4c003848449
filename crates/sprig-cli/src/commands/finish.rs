use super::{describe, json_pretty, Progress, Project, EXIT_SUCCESS};
use sprig_core::{FinishOptions, FinishOutcome};
use std::path::Path;

pub fn run(dir: &Path, query: &str, options: FinishOptions, json: bool) -> Result<u8, String> {
    let project = Project::open(dir)?;
    let progress = Progress::new(json);
    let orchestrator = project.orchestrator(&progress)?;
    let outcome = orchestrator
        .finish(query, options)
        .map_err(|e| describe(&e))?;

    if json {
        println!("{}", json_pretty(&outcome)?);
        return Ok(EXIT_SUCCESS);
    }
    match &outcome {
        FinishOutcome::Merged {
            branch,
            message,
            squash,
            ..
        } => {
            let style = if *squash { "squash-merged" } else { "merged" };
            let subject = message.lines().next().unwrap_or_default();
            println!("{style} {branch}: {subject}");
        }
        FinishOutcome::AlreadyMerged { branch } => {
            println!("{branch} is already merged; nothing committed");
        }
        FinishOutcome::PullRequestCreated { url } => println!("pull request created: {url}"),
        FinishOutcome::PullRequestPending {
            url,
            state,
            review_decision,
        } => {
            let review = review_decision.as_deref().unwrap_or("no review yet");
            println!("pull request not ready to merge ({state}, {review}): {url}");
        }
        FinishOutcome::PullRequestMerged { url, .. } => println!("pull request merged: {url}"),
    }
    Ok(EXIT_SUCCESS)
}
