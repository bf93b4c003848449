//! Maps a human identifier to a canonical environment identity.

use crate::ports::Sibling;
use crate::tracker::IssueTracker;
use crate::vcs::Vcs;
use crate::CoreError;
use serde::Serialize;
use sprig_schema::{slugify, BranchName, Config, EnvName, NameError};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

const MAX_TITLE_SLUG: usize = 40;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "does", "for", "from",
    "has", "have", "if", "in", "into", "is", "it", "its", "of", "on", "or", "should", "so",
    "that", "the", "their", "then", "there", "this", "to", "was", "when", "which", "while",
    "will", "with",
];

/// Canonical identity of one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    pub name: EnvName,
    pub branch: BranchName,
    pub worktree: PathBuf,
}

/// An environment that exists on disk, as found in the worktree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEnvironment {
    pub env: Environment,
    pub created: Option<SystemTime>,
}

impl LiveEnvironment {
    pub fn sibling(&self) -> Sibling {
        Sibling {
            name: self.env.name.to_string(),
            created: self.created,
        }
    }
}

/// `<worktree_root>/<project>-<name>`.
pub fn worktree_path(config: &Config, name: &EnvName) -> PathBuf {
    config
        .worktree_root()
        .join(format!("{}-{name}", config.project_name()))
}

/// Branch name synthesized from an issue title: lowercase, parentheticals
/// and stop-words dropped, at most 40 characters cut at a hyphen, then
/// `-<number>`. Falls back to `issue-<number>`.
pub fn branch_from_title(title: &str, number: u64) -> String {
    let mut stripped = String::with_capacity(title.len());
    let mut depth = 0usize;
    for c in title.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => stripped.push(c),
            _ => {}
        }
    }

    let words: Vec<String> = slugify(&stripped)
        .split('-')
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .map(str::to_owned)
        .collect();
    let mut slug = words.join("-");

    if slug.len() > MAX_TITLE_SLUG {
        let cut = &slug[..MAX_TITLE_SLUG];
        // keep whole words when there is a boundary to cut at
        let end = if slug.as_bytes()[MAX_TITLE_SLUG] == b'-' {
            MAX_TITLE_SLUG
        } else {
            cut.rfind('-').unwrap_or(MAX_TITLE_SLUG)
        };
        slug.truncate(end);
    }

    if slug.is_empty() {
        format!("issue-{number}")
    } else if slug.starts_with(|c: char| c.is_ascii_digit()) {
        format!("issue-{slug}-{number}")
    } else {
        format!("{slug}-{number}")
    }
}

/// Result of matching a query against existing environment names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    Exact(String),
    Unique(String),
    None,
    Ambiguous(Vec<String>),
}

/// Exact name wins; otherwise every name containing `query` is a candidate.
pub fn match_partial(query: &str, names: &[String]) -> Match {
    if let Some(exact) = names.iter().find(|n| n.as_str() == query) {
        return Match::Exact(exact.clone());
    }
    let mut hits: Vec<String> = names.iter().filter(|n| n.contains(query)).cloned().collect();
    match hits.len() {
        0 => Match::None,
        1 => Match::Unique(hits.remove(0)),
        _ => {
            hits.sort();
            Match::Ambiguous(hits)
        }
    }
}

pub struct Resolver<'a> {
    config: &'a Config,
    vcs: &'a dyn Vcs,
    tracker: &'a dyn IssueTracker,
}

impl<'a> Resolver<'a> {
    pub fn new(config: &'a Config, vcs: &'a dyn Vcs, tracker: &'a dyn IssueTracker) -> Self {
        Self {
            config,
            vcs,
            tracker,
        }
    }

    /// Identity for a new environment from a branch name or issue number.
    pub fn resolve(&self, raw: &str) -> Result<Environment, CoreError> {
        let raw = raw.trim();
        let issue = raw
            .bytes()
            .all(|b| b.is_ascii_digit())
            .then(|| raw.parse::<u64>().ok())
            .flatten();
        let branch = match issue {
            Some(number) => self.issue_branch(number)?,
            None => raw.to_lowercase(),
        };

        if branch == self.config.main_branch() {
            return Err(NameError::Reserved(branch).into());
        }
        let name = EnvName::parse(&branch.replace('/', "-"))?;
        debug!("resolved '{raw}' to {name} (branch {branch})");
        Ok(Environment {
            worktree: worktree_path(self.config, &name),
            name,
            branch: BranchName::new(branch),
        })
    }

    /// Reuse a local or remote branch ending in `-<number>`, else synthesize
    /// one from the issue title.
    fn issue_branch(&self, number: u64) -> Result<String, CoreError> {
        let suffix = format!("-{number}");
        let local = self.vcs.branches()?;
        if let Some(b) = local.into_iter().find(|b| b.ends_with(&suffix)) {
            debug!("issue #{number}: reusing local branch {b}");
            return Ok(b);
        }
        if let Some(b) = self
            .vcs
            .remote_branches()?
            .into_iter()
            .find(|b| b.ends_with(&suffix))
        {
            debug!("issue #{number}: reusing remote branch {b}");
            return Ok(b);
        }
        let issue = self.tracker.issue(number)?;
        Ok(branch_from_title(&issue.title, number))
    }

    /// Environments of this project that currently have a worktree.
    pub fn live(&self) -> Result<Vec<LiveEnvironment>, CoreError> {
        let root = self.config.worktree_root();
        let prefix = format!("{}-", self.config.project_name());
        let mut out = Vec::new();
        for wt in self.vcs.worktrees()? {
            if !same_dir(wt.path.parent(), &root) {
                continue;
            }
            let Some(name) = wt
                .path
                .file_name()
                .and_then(|f| f.to_str())
                .and_then(|f| f.strip_prefix(&prefix))
                .and_then(|n| EnvName::parse(n).ok())
            else {
                continue;
            };
            out.push(LiveEnvironment {
                env: Environment {
                    branch: BranchName::new(wt.branch.clone().unwrap_or_else(|| wt.head.clone())),
                    worktree: wt.path,
                    name,
                },
                created: wt.created,
            });
        }
        Ok(out)
    }

    /// Resolve `query` against the live environments. `Ok(None)` when nothing
    /// matches; more than one match is an error listing all of them.
    pub fn find(&self, query: &str) -> Result<Option<LiveEnvironment>, CoreError> {
        let live = self.live()?;
        let names: Vec<String> = live.iter().map(|l| l.env.name.to_string()).collect();
        let chosen = match match_partial(query.trim(), &names) {
            Match::Exact(n) | Match::Unique(n) => n,
            Match::None => return Ok(None),
            Match::Ambiguous(matches) => {
                return Err(CoreError::Ambiguous {
                    query: query.to_owned(),
                    matches,
                })
            }
        };
        Ok(live.into_iter().find(|l| l.env.name == chosen.as_str()))
    }

    /// Like [`Resolver::find`] but zero matches is an error.
    pub fn require(&self, query: &str) -> Result<LiveEnvironment, CoreError> {
        self.find(query)?
            .ok_or_else(|| CoreError::NotFound(query.to_owned()))
    }
}

fn same_dir(a: Option<&Path>, b: &Path) -> bool {
    let Some(a) = a else { return false };
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_becomes_branch() {
        assert_eq!(
            branch_from_title("Fix the login bug when password is empty", 86),
            "fix-login-bug-password-empty-86"
        );
    }

    #[test]
    fn parentheticals_are_dropped() {
        assert_eq!(
            branch_from_title("Crash on save (regression from v2)", 12),
            "crash-save-12"
        );
    }

    #[test]
    fn long_titles_cut_at_hyphen() {
        let branch = branch_from_title(
            "Implement incremental synchronization between warehouse inventory systems",
            7,
        );
        let slug = branch.strip_suffix("-7").unwrap();
        assert!(slug.len() <= MAX_TITLE_SLUG);
        assert!(!slug.ends_with('-'));
        assert_eq!(slug, "implement-incremental-synchronization");
    }

    #[test]
    fn empty_title_falls_back() {
        assert_eq!(branch_from_title("", 5), "issue-5");
        assert_eq!(branch_from_title("(wip) the a", 5), "issue-5");
    }

    #[test]
    fn leading_digit_titles_stay_valid() {
        let branch = branch_from_title("404 page is blank", 3);
        assert!(EnvName::parse(&branch).is_ok(), "{branch}");
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn partial_match_ambiguity_lists_every_candidate() {
        let envs = names(&["fix-bug-861", "fix-bug-86"]);
        assert_eq!(
            match_partial("86", &envs),
            Match::Ambiguous(names(&["fix-bug-86", "fix-bug-861"]))
        );
    }

    #[test]
    fn exact_match_beats_substring() {
        let envs = names(&["fix-bug-86", "fix-bug-861"]);
        assert_eq!(
            match_partial("fix-bug-86", &envs),
            Match::Exact("fix-bug-86".to_owned())
        );
        assert_eq!(
            match_partial("861", &envs),
            Match::Unique("fix-bug-861".to_owned())
        );
        assert_eq!(match_partial("nope", &envs), Match::None);
    }
}
