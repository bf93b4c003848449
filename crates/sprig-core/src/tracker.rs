use crate::CoreError;
use serde::Deserialize;
use sprig_adapters::exec::{capture, failure, run_tool, stdout_string};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub state: String,
    #[serde(default)]
    pub review_decision: Option<String>,
    #[serde(default)]
    pub mergeable: Option<String>,
    pub url: String,
}

impl PullRequest {
    pub fn is_merged(&self) -> bool {
        self.state.eq_ignore_ascii_case("merged")
    }

    pub fn is_approved(&self) -> bool {
        self.review_decision
            .as_deref()
            .is_some_and(|d| d.eq_ignore_ascii_case("approved"))
    }
}

/// Issue and pull-request lookups for the hosting service.
pub trait IssueTracker {
    fn name(&self) -> &str;

    fn issue(&self, number: u64) -> Result<Issue, CoreError>;

    /// The pull request whose head is `branch`, if one exists.
    fn pull_request(&self, branch: &str) -> Result<Option<PullRequest>, CoreError>;

    /// Open a pull request and return its URL.
    fn create_pull_request(&self, branch: &str, title: &str, body: &str)
        -> Result<String, CoreError>;

    /// Squash-merge the pull request for `branch` and delete the remote branch.
    fn merge_pull_request(&self, branch: &str) -> Result<(), CoreError>;
}

pub fn select_tracker(name: &str, root: &Path) -> Result<Box<dyn IssueTracker>, CoreError> {
    match name {
        "github" => Ok(Box::new(GitHub::new(root))),
        "none" => Ok(Box::new(NoTracker)),
        other => Err(CoreError::Configuration(format!(
            "unknown tracker backend '{other}' (expected one of: github, none)"
        ))),
    }
}

/// GitHub through the `gh` command line, run inside the primary checkout.
pub struct GitHub {
    root: PathBuf,
}

impl GitHub {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn gh(&self) -> Command {
        let mut cmd = Command::new("gh");
        cmd.current_dir(&self.root);
        cmd
    }
}

impl IssueTracker for GitHub {
    fn name(&self) -> &'static str {
        "github"
    }

    fn issue(&self, number: u64) -> Result<Issue, CoreError> {
        let output = run_tool(
            "gh",
            self.gh()
                .args(["issue", "view", &number.to_string(), "--json", "number,title,state"]),
        )?;
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    fn pull_request(&self, branch: &str) -> Result<Option<PullRequest>, CoreError> {
        let output = capture(
            "gh",
            self.gh().args([
                "pr",
                "view",
                branch,
                "--json",
                "state,reviewDecision,mergeable,url",
            ]),
        )?;
        if output.status.success() {
            return Ok(Some(serde_json::from_slice(&output.stdout)?));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no pull requests found") {
            Ok(None)
        } else {
            Err(failure("gh", &output).into())
        }
    }

    fn create_pull_request(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<String, CoreError> {
        let output = run_tool(
            "gh",
            self.gh()
                .args(["pr", "create", "--head", branch, "--title", title, "--body", body]),
        )?;
        // gh prints the new PR URL as the last line
        Ok(stdout_string(&output)
            .lines()
            .last()
            .unwrap_or_default()
            .to_owned())
    }

    fn merge_pull_request(&self, branch: &str) -> Result<(), CoreError> {
        run_tool(
            "gh",
            self.gh().args(["pr", "merge", branch, "--squash", "--delete-branch"]),
        )?;
        Ok(())
    }
}

/// Tracker used when `[tracker] backend = "none"`.
pub struct NoTracker;

impl NoTracker {
    fn disabled() -> CoreError {
        CoreError::Configuration(
            "this operation needs an issue tracker; set [tracker] backend = \"github\"".to_owned(),
        )
    }
}

impl IssueTracker for NoTracker {
    fn name(&self) -> &'static str {
        "none"
    }

    fn issue(&self, _number: u64) -> Result<Issue, CoreError> {
        Err(Self::disabled())
    }

    fn pull_request(&self, _branch: &str) -> Result<Option<PullRequest>, CoreError> {
        Err(Self::disabled())
    }

    fn create_pull_request(
        &self,
        _branch: &str,
        _title: &str,
        _body: &str,
    ) -> Result<String, CoreError> {
        Err(Self::disabled())
    }

    fn merge_pull_request(&self, _branch: &str) -> Result<(), CoreError> {
        Err(Self::disabled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_request_json_from_gh() {
        let pr: PullRequest = serde_json::from_str(
            r#"{"state":"OPEN","reviewDecision":"APPROVED","mergeable":"MERGEABLE","url":"https://github.com/o/r/pull/9"}"#,
        )
        .unwrap();
        assert!(pr.is_approved());
        assert!(!pr.is_merged());
    }

    #[test]
    fn empty_review_decision_is_not_approved() {
        let pr: PullRequest =
            serde_json::from_str(r#"{"state":"MERGED","reviewDecision":"","url":"u"}"#).unwrap();
        assert!(pr.is_merged());
        assert!(!pr.is_approved());
    }

    #[test]
    fn issue_json_from_gh() {
        let issue: Issue =
            serde_json::from_str(r#"{"number":86,"title":"Fix login bug","state":"OPEN"}"#).unwrap();
        assert_eq!(issue.number, 86);
        assert_eq!(issue.title, "Fix login bug");
    }

    #[test]
    fn select_tracker_backends() {
        let dir = Path::new("/tmp");
        assert_eq!(select_tracker("github", dir).unwrap().name(), "github");
        assert_eq!(select_tracker("none", dir).unwrap().name(), "none");
        assert!(select_tracker("jira", dir).err().unwrap().is_configuration());
    }

    #[test]
    fn disabled_tracker_reports_configuration() {
        assert!(NoTracker.issue(1).unwrap_err().is_configuration());
    }
}
