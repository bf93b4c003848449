use crate::exec::{run_tool, shell, stdout_string};
use crate::AdapterError;
use sprig_schema::MigrationsSection;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// Result of an optional migration capability. `NotSupported` means the tool
/// has no such operation; it is not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability<T> {
    Supported(T),
    NotSupported,
}

impl<T> Capability<T> {
    pub fn is_supported(&self) -> bool {
        matches!(self, Capability::Supported(_))
    }
}

/// The environment a migration runs against.
#[derive(Debug, Clone, Copy)]
pub struct MigrationEnv<'a> {
    pub name: &'a str,
    pub database_url: &'a str,
}

impl MigrationEnv<'_> {
    fn envs(&self) -> Vec<(String, String)> {
        vec![
            ("DATABASE_URL".to_owned(), self.database_url.to_owned()),
            ("SPRIG_ENV".to_owned(), self.name.to_owned()),
        ]
    }
}

pub trait Migrator: Send + Sync {
    fn name(&self) -> &str;

    /// Apply pending migrations inside `project_root`.
    fn run(&self, project_root: &Path, env: &MigrationEnv<'_>) -> Result<(), AdapterError>;

    fn add(
        &self,
        _project_root: &Path,
        _env: &MigrationEnv<'_>,
        _migration: &str,
    ) -> Result<Capability<()>, AdapterError> {
        Ok(Capability::NotSupported)
    }

    /// Revert the most recent migration.
    fn remove(
        &self,
        _project_root: &Path,
        _env: &MigrationEnv<'_>,
    ) -> Result<Capability<()>, AdapterError> {
        Ok(Capability::NotSupported)
    }

    fn list(
        &self,
        _project_root: &Path,
        _env: &MigrationEnv<'_>,
    ) -> Result<Capability<Vec<String>>, AdapterError> {
        Ok(Capability::NotSupported)
    }
}

pub fn select_migrator(
    section: &MigrationsSection,
    state_dir: &Path,
) -> Result<Box<dyn Migrator>, AdapterError> {
    match section.tool.as_str() {
        "sqlx" => Ok(Box::new(SqlxMigrator {
            dir: PathBuf::from(&section.dir),
        })),
        "dbmate" => Ok(Box::new(DbmateMigrator {
            dir: PathBuf::from(&section.dir),
        })),
        "script" => Ok(Box::new(ScriptMigrator {
            command: section.command.clone().unwrap_or_default(),
        })),
        "mock" => Ok(Box::new(crate::mock::MockMigrator::with_root(state_dir))),
        other => Err(AdapterError::UnknownBackend {
            family: "migration",
            name: other.to_owned(),
            expected: "sqlx, dbmate, script, mock",
        }),
    }
}

fn lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect()
}

/// `sqlx migrate` from sqlx-cli.
pub struct SqlxMigrator {
    dir: PathBuf,
}

impl SqlxMigrator {
    fn command(&self, project_root: &Path, env: &MigrationEnv<'_>, sub: &str) -> Command {
        let mut cmd = Command::new("sqlx");
        cmd.current_dir(project_root)
            .args(["migrate", sub, "--source"])
            .arg(&self.dir)
            .args(["--database-url", env.database_url]);
        cmd
    }
}

impl Migrator for SqlxMigrator {
    fn name(&self) -> &'static str {
        "sqlx"
    }

    fn run(&self, project_root: &Path, env: &MigrationEnv<'_>) -> Result<(), AdapterError> {
        run_tool("sqlx", &mut self.command(project_root, env, "run"))?;
        info!("sqlx migrations applied for {}", env.name);
        Ok(())
    }

    fn add(
        &self,
        project_root: &Path,
        _env: &MigrationEnv<'_>,
        migration: &str,
    ) -> Result<Capability<()>, AdapterError> {
        let mut cmd = Command::new("sqlx");
        cmd.current_dir(project_root)
            .args(["migrate", "add", "--source"])
            .arg(&self.dir)
            .arg(migration);
        run_tool("sqlx", &mut cmd)?;
        Ok(Capability::Supported(()))
    }

    fn remove(
        &self,
        project_root: &Path,
        env: &MigrationEnv<'_>,
    ) -> Result<Capability<()>, AdapterError> {
        run_tool("sqlx", &mut self.command(project_root, env, "revert"))?;
        Ok(Capability::Supported(()))
    }

    fn list(
        &self,
        project_root: &Path,
        env: &MigrationEnv<'_>,
    ) -> Result<Capability<Vec<String>>, AdapterError> {
        let output = run_tool("sqlx", &mut self.command(project_root, env, "info"))?;
        Ok(Capability::Supported(lines(&stdout_string(&output))))
    }
}

/// `dbmate`.
pub struct DbmateMigrator {
    dir: PathBuf,
}

impl DbmateMigrator {
    fn command(&self, project_root: &Path, env: &MigrationEnv<'_>, sub: &str) -> Command {
        let mut cmd = Command::new("dbmate");
        cmd.current_dir(project_root)
            .args(["--url", env.database_url, "--migrations-dir"])
            .arg(&self.dir)
            .arg(sub);
        cmd
    }
}

impl Migrator for DbmateMigrator {
    fn name(&self) -> &'static str {
        "dbmate"
    }

    fn run(&self, project_root: &Path, env: &MigrationEnv<'_>) -> Result<(), AdapterError> {
        run_tool("dbmate", &mut self.command(project_root, env, "migrate"))?;
        info!("dbmate migrations applied for {}", env.name);
        Ok(())
    }

    fn add(
        &self,
        project_root: &Path,
        env: &MigrationEnv<'_>,
        migration: &str,
    ) -> Result<Capability<()>, AdapterError> {
        let mut cmd = self.command(project_root, env, "new");
        cmd.arg(migration);
        run_tool("dbmate", &mut cmd)?;
        Ok(Capability::Supported(()))
    }

    fn remove(
        &self,
        project_root: &Path,
        env: &MigrationEnv<'_>,
    ) -> Result<Capability<()>, AdapterError> {
        run_tool("dbmate", &mut self.command(project_root, env, "rollback"))?;
        Ok(Capability::Supported(()))
    }

    fn list(
        &self,
        project_root: &Path,
        env: &MigrationEnv<'_>,
    ) -> Result<Capability<Vec<String>>, AdapterError> {
        let output = run_tool("dbmate", &mut self.command(project_root, env, "status"))?;
        Ok(Capability::Supported(lines(&stdout_string(&output))))
    }
}

/// A project-specific shell command. Only `run` is available.
pub struct ScriptMigrator {
    command: String,
}

impl Migrator for ScriptMigrator {
    fn name(&self) -> &'static str {
        "script"
    }

    fn run(&self, project_root: &Path, env: &MigrationEnv<'_>) -> Result<(), AdapterError> {
        run_tool(
            "migration script",
            &mut shell(&self.command, project_root, &env.envs()),
        )?;
        info!("migration script finished for {}", env.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(tool: &str, command: Option<&str>) -> MigrationsSection {
        MigrationsSection {
            tool: tool.to_owned(),
            command: command.map(str::to_owned),
            dir: "migrations".to_owned(),
        }
    }

    fn env() -> MigrationEnv<'static> {
        MigrationEnv {
            name: "my-feature",
            database_url: "postgres://postgres@localhost:5432/shop_my_feature",
        }
    }

    #[test]
    fn select_known_tools() {
        let dir = tempfile::tempdir().unwrap();
        for tool in ["sqlx", "dbmate", "mock"] {
            assert!(select_migrator(&section(tool, None), dir.path()).is_ok());
        }
        assert!(select_migrator(&section("script", Some("true")), dir.path()).is_ok());
    }

    #[test]
    fn select_unknown_tool_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = select_migrator(&section("flyway", None), dir.path())
            .err()
            .unwrap();
        assert!(err.to_string().starts_with("configuration error:"));
    }

    #[test]
    fn script_runs_with_database_url() {
        let dir = tempfile::tempdir().unwrap();
        let migrator = ScriptMigrator {
            command: "printf '%s %s' \"$SPRIG_ENV\" \"$DATABASE_URL\" > ran.txt".to_owned(),
        };
        migrator.run(dir.path(), &env()).unwrap();
        let ran = std::fs::read_to_string(dir.path().join("ran.txt")).unwrap();
        assert_eq!(
            ran,
            "my-feature postgres://postgres@localhost:5432/shop_my_feature"
        );
    }

    #[test]
    fn script_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let migrator = ScriptMigrator {
            command: "exit 1".to_owned(),
        };
        assert!(migrator.run(dir.path(), &env()).is_err());
    }

    #[test]
    fn script_optional_capabilities_are_not_supported() {
        let dir = tempfile::tempdir().unwrap();
        let migrator = ScriptMigrator {
            command: "true".to_owned(),
        };
        assert_eq!(
            migrator.add(dir.path(), &env(), "x").unwrap(),
            Capability::NotSupported
        );
        assert_eq!(
            migrator.remove(dir.path(), &env()).unwrap(),
            Capability::NotSupported
        );
        assert!(!migrator.list(dir.path(), &env()).unwrap().is_supported());
    }

    #[test]
    fn sqlx_command_shape() {
        let migrator = SqlxMigrator {
            dir: PathBuf::from("db/migrations"),
        };
        let cmd = migrator.command(Path::new("/tmp"), &env(), "run");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "migrate",
                "run",
                "--source",
                "db/migrations",
                "--database-url",
                env().database_url
            ]
        );
    }
}
