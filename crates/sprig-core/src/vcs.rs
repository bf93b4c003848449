use crate::CoreError;
use sprig_adapters::exec::{capture, failure, run_tool, stdout_string};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

/// One entry of the worktree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub path: PathBuf,
    pub head: String,
    /// `None` for a detached HEAD.
    pub branch: Option<String>,
    pub created: Option<SystemTime>,
}

/// Where the branch of a new worktree comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchSource {
    /// The branch already exists locally.
    Local,
    /// Create a local branch tracking this remote ref (`origin/<branch>`).
    Remote(String),
    /// Create a new branch starting at this commit.
    New { from: String },
}

/// Version-control operations the orchestrator and finish workflow need.
pub trait Vcs {
    /// Root of the primary checkout.
    fn main_root(&self) -> &Path;

    /// Shared git directory of every worktree.
    fn common_dir(&self) -> Result<PathBuf, CoreError>;

    fn worktrees(&self) -> Result<Vec<Worktree>, CoreError>;

    fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        source: &BranchSource,
    ) -> Result<(), CoreError>;

    fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), CoreError>;

    fn branches(&self) -> Result<Vec<String>, CoreError>;

    /// Remote branch names with the remote prefix stripped.
    fn remote_branches(&self) -> Result<Vec<String>, CoreError>;

    fn local_branch_exists(&self, branch: &str) -> Result<bool, CoreError>;

    /// `<remote>/<branch>` when some remote carries `branch`.
    fn remote_branch(&self, branch: &str) -> Result<Option<String>, CoreError>;

    fn delete_branch(&self, branch: &str, force: bool) -> Result<(), CoreError>;

    /// Subjects of the commits on `branch` that `base` lacks, oldest first.
    fn ahead_subjects(&self, base: &str, branch: &str) -> Result<Vec<String>, CoreError>;

    /// `(ahead, behind)` of `branch` relative to `base`.
    fn ahead_behind(&self, base: &str, branch: &str) -> Result<(usize, usize), CoreError>;

    fn head(&self, dir: &Path) -> Result<String, CoreError>;

    fn current_branch(&self, dir: &Path) -> Result<Option<String>, CoreError>;

    /// Modified, staged and untracked paths in the worktree at `dir`.
    fn changed_paths(&self, dir: &Path) -> Result<Vec<String>, CoreError>;

    fn is_dirty(&self, dir: &Path) -> Result<bool, CoreError> {
        Ok(!self.changed_paths(dir)?.is_empty())
    }

    fn checkout(&self, dir: &Path, branch: &str) -> Result<(), CoreError>;

    fn has_upstream(&self, dir: &Path, branch: &str) -> Result<bool, CoreError>;

    fn pull_ff(&self, dir: &Path) -> Result<(), CoreError>;

    fn merge_squash(&self, dir: &Path, branch: &str) -> Result<(), CoreError>;

    fn merge_no_ff(&self, dir: &Path, branch: &str, message: &str) -> Result<(), CoreError>;

    fn has_staged_changes(&self, dir: &Path) -> Result<bool, CoreError>;

    fn commit(&self, dir: &Path, message: &str) -> Result<(), CoreError>;

    /// Throw away a conflicted or half-staged merge, back to `HEAD`.
    fn abort_merge(&self, dir: &Path) -> Result<(), CoreError>;

    fn push(&self, dir: &Path, branch: &str) -> Result<(), CoreError>;
}

/// [`Vcs`] over the `git` command line.
#[derive(Debug, Clone)]
pub struct Git {
    root: PathBuf,
}

impl Git {
    /// Locate the primary checkout from any directory inside the repository
    /// or one of its worktrees.
    pub fn discover(dir: &Path) -> Result<Self, CoreError> {
        let output = run_tool("git", git_in(dir).args(["worktree", "list", "--porcelain"]))?;
        let listing = String::from_utf8_lossy(&output.stdout);
        let root = parse_worktrees(&listing)
            .into_iter()
            .next()
            .map(|w| w.path)
            .ok_or_else(|| CoreError::Parse {
                tool: "git",
                detail: "empty worktree listing".to_owned(),
            })?;
        Ok(Self { root })
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Top level of the worktree containing `dir`.
    pub fn toplevel(dir: &Path) -> Result<PathBuf, CoreError> {
        let output = run_tool("git", git_in(dir).args(["rev-parse", "--show-toplevel"]))?;
        Ok(PathBuf::from(stdout_string(&output)))
    }

    fn git(&self) -> Command {
        git_in(&self.root)
    }

    fn lines(&self, args: &[&str]) -> Result<Vec<String>, CoreError> {
        let output = run_tool("git", self.git().args(args))?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }
}

fn git_in(dir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(dir);
    cmd
}

fn run(cmd: &mut Command) -> Result<(), CoreError> {
    run_tool("git", cmd)?;
    Ok(())
}

/// Parse `git worktree list --porcelain`. Bare entries are skipped.
pub fn parse_worktrees(listing: &str) -> Vec<Worktree> {
    let mut out = Vec::new();
    for block in listing.split("\n\n") {
        let mut path = None;
        let mut head = String::new();
        let mut branch = None;
        let mut bare = false;
        for line in block.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                path = Some(PathBuf::from(p));
            } else if let Some(h) = line.strip_prefix("HEAD ") {
                head = h.to_owned();
            } else if let Some(b) = line.strip_prefix("branch ") {
                branch = Some(b.strip_prefix("refs/heads/").unwrap_or(b).to_owned());
            } else if line == "bare" {
                bare = true;
            }
        }
        if let (Some(path), false) = (path, bare) {
            let created = worktree_created(&path);
            out.push(Worktree {
                path,
                head,
                branch,
                created,
            });
        }
    }
    out
}

/// When the worktree was made. Without a birth time this falls back to the
/// `.git` link file, which git writes once, because the directory's own
/// mtime moves whenever top-level entries change.
pub fn worktree_created(path: &Path) -> Option<SystemTime> {
    fs::metadata(path)
        .and_then(|m| m.created())
        .or_else(|_| fs::metadata(path.join(".git")).and_then(|m| m.modified()))
        .ok()
}

/// Paths from `git status --porcelain`; renames report the new path.
pub fn parse_status(status: &str) -> Vec<String> {
    status
        .lines()
        .filter(|l| l.len() > 3)
        .map(|l| {
            let path = &l[3..];
            path.rsplit_once(" -> ").map_or(path, |(_, to)| to).to_owned()
        })
        .collect()
}

impl Vcs for Git {
    fn main_root(&self) -> &Path {
        &self.root
    }

    fn common_dir(&self) -> Result<PathBuf, CoreError> {
        let output = run_tool(
            "git",
            self.git()
                .args(["rev-parse", "--path-format=absolute", "--git-common-dir"]),
        )?;
        Ok(PathBuf::from(stdout_string(&output)))
    }

    fn worktrees(&self) -> Result<Vec<Worktree>, CoreError> {
        let output = run_tool("git", self.git().args(["worktree", "list", "--porcelain"]))?;
        Ok(parse_worktrees(&String::from_utf8_lossy(&output.stdout)))
    }

    fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        source: &BranchSource,
    ) -> Result<(), CoreError> {
        let mut cmd = self.git();
        cmd.args(["worktree", "add"]);
        match source {
            BranchSource::Local => {
                cmd.arg(path).arg(branch);
            }
            BranchSource::Remote(remote_ref) => {
                cmd.args(["--track", "-b", branch]).arg(path).arg(remote_ref);
            }
            BranchSource::New { from } => {
                cmd.args(["-b", branch]).arg(path).arg(from);
            }
        }
        run(&mut cmd)
    }

    fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), CoreError> {
        let mut cmd = self.git();
        cmd.args(["worktree", "remove"]);
        if force {
            cmd.arg("--force");
        }
        run(cmd.arg(path))?;
        run(self.git().args(["worktree", "prune"]))
    }

    fn branches(&self) -> Result<Vec<String>, CoreError> {
        self.lines(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])
    }

    fn remote_branches(&self) -> Result<Vec<String>, CoreError> {
        Ok(self
            .lines(&["for-each-ref", "--format=%(refname:lstrip=3)", "refs/remotes"])?
            .into_iter()
            .filter(|b| b != "HEAD")
            .collect())
    }

    fn local_branch_exists(&self, branch: &str) -> Result<bool, CoreError> {
        let output = capture(
            "git",
            self.git()
                .args(["show-ref", "--verify", "--quiet"])
                .arg(format!("refs/heads/{branch}")),
        )?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(failure("git", &output).into()),
        }
    }

    fn remote_branch(&self, branch: &str) -> Result<Option<String>, CoreError> {
        let pattern = format!("refs/remotes/*/{branch}");
        Ok(self
            .lines(&["for-each-ref", "--format=%(refname:short)", &pattern])?
            .into_iter()
            .next())
    }

    fn delete_branch(&self, branch: &str, force: bool) -> Result<(), CoreError> {
        let flag = if force { "-D" } else { "-d" };
        run(self.git().args(["branch", flag, branch]))
    }

    fn ahead_subjects(&self, base: &str, branch: &str) -> Result<Vec<String>, CoreError> {
        self.lines(&["log", "--reverse", "--format=%s", &format!("{base}..{branch}")])
    }

    fn ahead_behind(&self, base: &str, branch: &str) -> Result<(usize, usize), CoreError> {
        let output = run_tool(
            "git",
            self.git()
                .args(["rev-list", "--left-right", "--count"])
                .arg(format!("{base}...{branch}")),
        )?;
        let text = stdout_string(&output);
        let mut parts = text.split_whitespace().map(str::parse::<usize>);
        match (parts.next(), parts.next()) {
            (Some(Ok(behind)), Some(Ok(ahead))) => Ok((ahead, behind)),
            _ => Err(CoreError::Parse {
                tool: "git",
                detail: format!("rev-list --count printed '{text}'"),
            }),
        }
    }

    fn head(&self, dir: &Path) -> Result<String, CoreError> {
        let output = run_tool("git", git_in(dir).args(["rev-parse", "HEAD"]))?;
        Ok(stdout_string(&output))
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>, CoreError> {
        let output = capture(
            "git",
            git_in(dir).args(["symbolic-ref", "--quiet", "--short", "HEAD"]),
        )?;
        match output.status.code() {
            Some(0) => Ok(Some(stdout_string(&output))),
            // detached HEAD
            Some(1) => Ok(None),
            _ => Err(failure("git", &output).into()),
        }
    }

    fn changed_paths(&self, dir: &Path) -> Result<Vec<String>, CoreError> {
        let output = run_tool(
            "git",
            git_in(dir).args(["status", "--porcelain", "--untracked-files=all"]),
        )?;
        Ok(parse_status(&String::from_utf8_lossy(&output.stdout)))
    }

    fn checkout(&self, dir: &Path, branch: &str) -> Result<(), CoreError> {
        run(git_in(dir).args(["checkout", branch]))
    }

    fn has_upstream(&self, dir: &Path, branch: &str) -> Result<bool, CoreError> {
        let output = capture(
            "git",
            git_in(dir)
                .args(["rev-parse", "--abbrev-ref", "--symbolic-full-name"])
                .arg(format!("{branch}@{{upstream}}")),
        )?;
        Ok(output.status.success())
    }

    fn pull_ff(&self, dir: &Path) -> Result<(), CoreError> {
        run(git_in(dir).args(["pull", "--ff-only"]))
    }

    fn merge_squash(&self, dir: &Path, branch: &str) -> Result<(), CoreError> {
        run(git_in(dir).args(["merge", "--squash", branch]))
    }

    fn merge_no_ff(&self, dir: &Path, branch: &str, message: &str) -> Result<(), CoreError> {
        run(git_in(dir).args(["merge", "--no-ff", "-m", message, branch]))
    }

    fn has_staged_changes(&self, dir: &Path) -> Result<bool, CoreError> {
        let output = capture("git", git_in(dir).args(["diff", "--cached", "--quiet"]))?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(failure("git", &output).into()),
        }
    }

    fn commit(&self, dir: &Path, message: &str) -> Result<(), CoreError> {
        run(git_in(dir).args(["commit", "-m", message]))
    }

    fn abort_merge(&self, dir: &Path) -> Result<(), CoreError> {
        // unlike `merge --abort`, also undoes `merge --squash`
        run(git_in(dir).args(["reset", "--merge"]))
    }

    fn push(&self, dir: &Path, branch: &str) -> Result<(), CoreError> {
        run(git_in(dir).args(["push", "-u", "origin", branch]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_porcelain_listing() {
        let listing = "worktree /work/shop\nHEAD 1111\nbranch refs/heads/main\n\n\
                       worktree /work/shop-fix-bug-86\nHEAD 2222\nbranch refs/heads/fix-bug-86\n\n\
                       worktree /work/shop-detached\nHEAD 3333\ndetached\n";
        let wts = parse_worktrees(listing);
        assert_eq!(wts.len(), 3);
        assert_eq!(wts[0].path, PathBuf::from("/work/shop"));
        assert_eq!(wts[0].branch.as_deref(), Some("main"));
        assert_eq!(wts[1].branch.as_deref(), Some("fix-bug-86"));
        assert_eq!(wts[1].head, "2222");
        assert!(wts[2].branch.is_none());
    }

    #[test]
    fn parse_skips_bare_entries() {
        let listing = "worktree /srv/shop.git\nbare\n\nworktree /work/shop-a\nHEAD 1\nbranch refs/heads/a\n";
        let wts = parse_worktrees(listing);
        assert_eq!(wts.len(), 1);
        assert_eq!(wts[0].path, PathBuf::from("/work/shop-a"));
    }

    #[test]
    fn status_paths() {
        let paths = parse_status(" M src/lib.rs\n?? .vscode/launch.json\nR  old.rs -> new.rs\n");
        assert_eq!(paths, ["src/lib.rs", ".vscode/launch.json", "new.rs"]);
    }

    #[test]
    fn creation_time_ignores_top_level_churn() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".git"), "gitdir: /work/shop/.git/worktrees/x\n").unwrap();
        let before = worktree_created(dir.path()).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));
        fs::write(dir.path().join("new-file.txt"), "x").unwrap();
        fs::remove_file(dir.path().join("new-file.txt")).unwrap();

        assert_eq!(worktree_created(dir.path()), Some(before));
    }

    #[test]
    fn parse_keeps_slashes_in_branch_names() {
        let wts = parse_worktrees("worktree /w/x\nHEAD 1\nbranch refs/heads/feature/login\n");
        assert_eq!(wts[0].branch.as_deref(), Some("feature/login"));
    }
}
