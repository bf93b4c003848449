//! Reconciles an environment into mainline, then tears it down.

use crate::identity::LiveEnvironment;
use crate::orchestrator::{DownReport, Event, Orchestrator};
use crate::CoreError;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct FinishOptions {
    /// Go through a pull request instead of merging locally.
    pub pull_request: bool,
    /// Squash-merge (direct mode). `project.squash` turns this on by default.
    pub squash: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FinishOutcome {
    Merged {
        branch: String,
        message: String,
        squash: bool,
        teardown: DownReport,
    },
    /// Squash merge staged nothing: mainline already has these changes.
    /// No commit was made and the environment was left in place.
    AlreadyMerged { branch: String },
    PullRequestCreated { url: String },
    /// The pull request exists but cannot be merged yet.
    PullRequestPending {
        url: String,
        state: String,
        review_decision: Option<String>,
    },
    PullRequestMerged { url: String, teardown: DownReport },
}

/// Issue number encoded as a trailing `-<n>` in the branch name.
pub fn issue_number(branch: &str) -> Option<u64> {
    let (_, tail) = branch.rsplit_once('-')?;
    if tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    tail.parse().ok()
}

/// `title`, plus a `Fixes #<n>` trailer when an issue is known.
pub fn commit_message(title: &str, issue: Option<u64>) -> String {
    match issue {
        Some(n) => format!("{title}\n\nFixes #{n}"),
        None => title.to_owned(),
    }
}

impl Orchestrator<'_> {
    pub fn finish(&self, query: &str, options: FinishOptions) -> Result<FinishOutcome, CoreError> {
        let live = self.resolver().require(query)?;
        let changed = self.user_changes(&live.env.worktree)?;
        if !changed.is_empty() {
            return Err(CoreError::Unsafe {
                env: live.env.name.to_string(),
                reason: format!(
                    "the worktree has uncommitted changes ({}); commit or stash them first",
                    changed.join(", ")
                ),
            });
        }
        if options.pull_request {
            self.finish_via_pull_request(&live)
        } else {
            let squash = options.squash || self.config().file().project.squash;
            self.finish_direct(&live, squash)
        }
    }

    /// Subjects ahead of mainline; none is `NothingToMerge`.
    fn ahead_or_nothing(&self, live: &LiveEnvironment) -> Result<Vec<String>, CoreError> {
        let main = self.config().main_branch();
        let subjects = self.vcs().ahead_subjects(main, &live.env.branch)?;
        if subjects.is_empty() {
            return Err(CoreError::NothingToMerge {
                branch: live.env.branch.to_string(),
                main: main.to_owned(),
            });
        }
        Ok(subjects)
    }

    /// Issue title when the branch names an issue the tracker knows, else the
    /// oldest commit subject ahead of mainline.
    fn merge_title(&self, branch: &str, subjects: &[String]) -> (String, Option<u64>) {
        if let Some(n) = issue_number(branch) {
            match self.tracker().issue(n) {
                Ok(issue) if !issue.title.trim().is_empty() => {
                    return (issue.title.trim().to_owned(), Some(n));
                }
                Ok(_) => {}
                Err(e) => debug!("issue #{n} lookup failed, using commit subject: {e}"),
            }
        }
        (subjects.first().cloned().unwrap_or_default(), None)
    }

    fn finish_direct(&self, live: &LiveEnvironment, squash: bool) -> Result<FinishOutcome, CoreError> {
        let vcs = self.vcs();
        let main = self.config().main_branch();
        let root = vcs.main_root().to_path_buf();
        let branch = live.env.branch.as_str();

        let subjects = self.ahead_or_nothing(live)?;
        let (title, issue) = self.merge_title(branch, &subjects);
        let message = commit_message(&title, issue);

        vcs.checkout(&root, main)?;
        if vcs.has_upstream(&root, main)? {
            vcs.pull_ff(&root)?;
        } else {
            let note = format!("'{main}' has no upstream; skipping pull");
            warn!("{note}");
            self.emit(Event::Warning(note));
        }

        if squash {
            self.merging(&root, branch, || vcs.merge_squash(&root, branch))?;
            if !vcs.has_staged_changes(&root)? {
                info!("{branch} is already merged into {main}");
                return Ok(FinishOutcome::AlreadyMerged {
                    branch: branch.to_owned(),
                });
            }
            self.merging(&root, branch, || vcs.commit(&root, &message))?;
        } else {
            self.merging(&root, branch, || vcs.merge_no_ff(&root, branch, &message))?;
        }
        info!("merged {branch} into {main}");

        let teardown = self.teardown(live, true)?;
        Ok(FinishOutcome::Merged {
            branch: branch.to_owned(),
            message,
            squash,
            teardown,
        })
    }

    /// Run one merge step in the primary checkout. On failure the partial
    /// merge is thrown away and the user is told what state the checkout is
    /// left in.
    fn merging(
        &self,
        root: &Path,
        branch: &str,
        step: impl FnOnce() -> Result<(), CoreError>,
    ) -> Result<(), CoreError> {
        let Err(error) = step() else {
            return Ok(());
        };
        let main = self.config().main_branch();
        let note = match self.vcs().abort_merge(root) {
            Ok(()) => format!(
                "merging {branch} failed and was aborted; {} is clean and on '{main}'",
                root.display()
            ),
            Err(e) => format!(
                "merging {branch} failed and could not be aborted ({e}); \
                 resolve or run `git merge --abort` in {}",
                root.display()
            ),
        };
        warn!("{note}");
        self.emit(Event::Warning(note));
        Err(error)
    }

    fn finish_via_pull_request(&self, live: &LiveEnvironment) -> Result<FinishOutcome, CoreError> {
        let branch = live.env.branch.as_str();
        let Some(pr) = self.tracker().pull_request(branch)? else {
            let subjects = self.ahead_or_nothing(live)?;
            let (title, issue) = self.merge_title(branch, &subjects);
            self.vcs().push(&live.env.worktree, branch)?;
            let body = issue.map(|n| format!("Fixes #{n}")).unwrap_or_default();
            let url = self.tracker().create_pull_request(branch, &title, &body)?;
            info!("opened pull request {url}");
            return Ok(FinishOutcome::PullRequestCreated { url });
        };

        if pr.is_merged() {
            let teardown = self.teardown(live, true)?;
            return Ok(FinishOutcome::PullRequestMerged {
                url: pr.url,
                teardown,
            });
        }
        if !pr.is_approved() {
            return Ok(FinishOutcome::PullRequestPending {
                url: pr.url,
                state: pr.state,
                review_decision: pr.review_decision,
            });
        }
        self.tracker().merge_pull_request(branch)?;
        let teardown = self.teardown(live, true)?;
        Ok(FinishOutcome::PullRequestMerged {
            url: pr.url,
            teardown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_number_from_branch_suffix() {
        assert_eq!(issue_number("fix-login-86"), Some(86));
        assert_eq!(issue_number("feature/login-7"), Some(7));
        assert_eq!(issue_number("my-feature"), None);
        assert_eq!(issue_number("v2"), None);
        assert_eq!(issue_number("trailing-"), None);
    }

    #[test]
    fn trailer_only_with_issue() {
        assert_eq!(commit_message("Fix login", Some(86)), "Fix login\n\nFixes #86");
        assert_eq!(commit_message("Fix login", None), "Fix login");
    }
}
