//! Subprocess helpers shared by every CLI-backed adapter.

use crate::prereq::install_hint;
use crate::AdapterError;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Run `cmd` to completion and capture its output.
///
/// A missing executable becomes `ToolUnavailable`; a non-zero exit becomes
/// `CommandFailed` carrying the trimmed stderr (or stdout when stderr is empty).
pub fn run_tool(tool: &str, cmd: &mut Command) -> Result<Output, AdapterError> {
    let output = capture(tool, cmd)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(failure(tool, &output))
    }
}

/// Like [`run_tool`] but hands back non-zero exits to the caller for
/// tools whose exit status carries meaning (`pg_isready`, `pgrep`).
pub fn capture(tool: &str, cmd: &mut Command) -> Result<Output, AdapterError> {
    debug!("exec: {cmd:?}");
    cmd.stdin(Stdio::null()).output().map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            AdapterError::ToolUnavailable {
                tool: tool.to_owned(),
                hint: install_hint(tool).to_owned(),
            }
        } else {
            AdapterError::Io(e)
        }
    })
}

pub fn failure(tool: &str, output: &Output) -> AdapterError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = if stderr.trim().is_empty() {
        stdout.trim().to_owned()
    } else {
        stderr.trim().to_owned()
    };
    let detail = if detail.is_empty() {
        match output.status.code() {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_owned(),
        }
    } else {
        detail
    };
    AdapterError::CommandFailed {
        tool: tool.to_owned(),
        detail,
    }
}

pub fn stdout_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_owned()
}

/// Build a `sh -c <command>` invocation in `cwd` with extra environment.
pub fn shell(command: &str, cwd: &Path, envs: &[(String, String)]) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(cwd);
    for (k, v) in envs {
        cmd.env(k, v);
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_maps_to_tool_unavailable() {
        let err = run_tool(
            "sprig-definitely-missing",
            &mut Command::new("sprig-definitely-missing-binary"),
        )
        .unwrap_err();
        assert!(err.is_tool_unavailable());
    }

    #[test]
    fn non_zero_exit_maps_to_command_failed_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_tool("sh", &mut shell("echo boom >&2; exit 3", dir.path(), &[])).unwrap_err();
        match err {
            AdapterError::CommandFailed { tool, detail } => {
                assert_eq!(tool, "sh");
                assert_eq!(detail, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn silent_failure_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_tool("sh", &mut shell("exit 4", dir.path(), &[])).unwrap_err();
        assert!(err.to_string().contains("exit code 4"));
    }

    #[test]
    fn shell_passes_environment_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_tool(
            "sh",
            &mut shell(
                "printf '%s' \"$SPRIG_ENV\"; pwd >/dev/null",
                dir.path(),
                &[("SPRIG_ENV".to_owned(), "my-feature".to_owned())],
            ),
        )
        .unwrap();
        assert_eq!(stdout_string(&out), "my-feature");
    }
}
