use sprig_schema::Config;
use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

pub fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Install instructions for the external tools adapters shell out to.
pub fn install_hint(tool: &str) -> &'static str {
    match tool {
        "git" => "zypper install git | apt install git | dnf install git | pacman -S git",
        "psql" | "pg_isready" => {
            "zypper install postgresql | apt install postgresql-client | dnf install postgresql"
        }
        "mysql" | "mysqladmin" => {
            "zypper install mariadb-client | apt install mysql-client | dnf install mysql"
        }
        "sqlx" => "cargo install sqlx-cli",
        "dbmate" => "https://github.com/amacneil/dbmate#installation",
        "az" => "https://learn.microsoft.com/cli/azure/install-azure-cli",
        "aws" => "https://docs.aws.amazon.com/cli/latest/userguide/getting-started-install.html",
        "gh" => "https://cli.github.com",
        "firefox" => "install Firefox from your distribution",
        "pgrep" | "pkill" => "part of procps (usually pre-installed)",
        tool if tool.contains("chrom") => "install Google Chrome or Chromium",
        _ => "see the tool's documentation",
    }
}

fn missing(name: &'static str, purpose: &'static str) -> MissingPrereq {
    MissingPrereq {
        name,
        purpose,
        install_hint: install_hint(name),
    }
}

/// Check the executables the configured backends need.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_prereqs(config: &Config) -> Vec<MissingPrereq> {
    let mut out = Vec::new();

    if !command_exists("git") {
        out.push(missing("git", "worktrees and branches"));
    }

    match config.database().backend.as_str() {
        "postgres" => {
            if !command_exists("psql") {
                out.push(missing("psql", "creating and dropping databases"));
            }
            if !command_exists("pg_isready") {
                out.push(missing("pg_isready", "waiting for the database server"));
            }
        }
        "mysql" => {
            if !command_exists("mysql") {
                out.push(missing("mysql", "creating and dropping databases"));
            }
            if !command_exists("mysqladmin") {
                out.push(missing("mysqladmin", "waiting for the database server"));
            }
        }
        _ => {}
    }

    if let Some(m) = config.migrations() {
        match m.tool.as_str() {
            "sqlx" if !command_exists("sqlx") => out.push(missing("sqlx", "running migrations")),
            "dbmate" if !command_exists("dbmate") => {
                out.push(missing("dbmate", "running migrations"));
            }
            _ => {}
        }
    }

    if let Some(s) = config.storage() {
        match s.backend.as_str() {
            "azure" if !command_exists("az") => out.push(missing("az", "blob containers")),
            "s3" if !command_exists("aws") => out.push(missing("aws", "S3 buckets")),
            _ => {}
        }
    }

    if let Some(b) = config.browser() {
        match b.backend.as_str() {
            "chrome" if crate::browser::chrome_binary().is_none() => {
                out.push(missing("chrome", "browser debug sessions"));
            }
            "firefox" if !command_exists("firefox") => {
                out.push(missing("firefox", "browser debug sessions"));
            }
            _ => {}
        }
        if b.backend != "mock" && !command_exists("pgrep") {
            out.push(missing("pgrep", "finding browser sessions"));
        }
    }

    if config.tracker_backend() == "github" && !command_exists("gh") {
        out.push(missing("gh", "issue titles and pull requests"));
    }

    out
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nsprig shells out to these tools for the configured backends.");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "psql",
            purpose: "databases",
            install_hint: "apt install postgresql-client",
        };
        let s = format!("{m}");
        assert!(s.contains("psql"));
        assert!(s.contains("databases"));
        assert!(s.contains("apt install postgresql-client"));
    }

    #[test]
    fn format_missing_produces_readable_output() {
        let items = vec![missing("az", "blob containers"), missing("gh", "pull requests")];
        let output = format_missing(&items);
        assert!(output.contains("missing prerequisites:"));
        assert!(output.contains("az"));
        assert!(output.contains("cli.github.com"));
    }

    #[test]
    fn mock_backends_need_no_tools_beyond_git() {
        let config = Config::parse(
            r#"
[database]
backend = "mock"
[storage]
backend = "mock"
[browser]
backend = "mock"
[tracker]
backend = "none"
"#,
            Path::new("/tmp/project"),
        )
        .unwrap();
        let missing = check_prereqs(&config);
        assert!(missing.iter().all(|m| m.name == "git"));
    }

    #[test]
    fn every_known_tool_has_a_hint() {
        for tool in ["git", "psql", "mysql", "sqlx", "dbmate", "az", "aws", "gh", "firefox"] {
            assert_ne!(install_hint(tool), "see the tool's documentation", "{tool}");
        }
    }
}
