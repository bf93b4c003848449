//! File-backed stand-ins for every resource family.
//!
//! State lives under `<state_dir>/mock/` so separate `sprig` invocations
//! against the same project observe the same databases, containers and
//! browser sessions. Selected with `backend = "mock"` (or `tool = "mock"`).

use crate::browser::BrowserBackend;
use crate::database::{DatabaseBackend, DbConnection, DropOutcome};
use crate::migration::{Capability, MigrationEnv, Migrator};
use crate::storage::{StorageBackend, StorageConnection};
use crate::AdapterError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Marker file that makes the mock database server unreachable.
pub const UNREACHABLE_MARKER: &str = "database-unreachable";
/// Marker file that makes the mock browser report a conflict.
pub const CONFLICT_MARKER: &str = "browser-conflict";

fn mock_root(state_dir: &Path) -> PathBuf {
    state_dir.join("mock")
}

fn entries(dir: &Path) -> Result<Vec<String>, AdapterError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

pub struct MockDatabase {
    root: PathBuf,
}

impl MockDatabase {
    pub fn with_root(state_dir: &Path) -> Self {
        Self {
            root: mock_root(state_dir),
        }
    }

    fn dir(&self) -> PathBuf {
        self.root.join("databases")
    }

    pub fn databases(&self) -> Result<Vec<String>, AdapterError> {
        entries(&self.dir())
    }
}

impl DatabaseBackend for MockDatabase {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create_database(&self, db: &str, conn: &DbConnection) -> Result<(), AdapterError> {
        if self.database_exists(db, conn)? {
            return Err(AdapterError::AlreadyExists(db.to_owned()));
        }
        fs::create_dir_all(self.dir())?;
        fs::write(self.dir().join(db), "")?;
        Ok(())
    }

    fn drop_database(&self, db: &str, conn: &DbConnection) -> Result<DropOutcome, AdapterError> {
        if !self.database_exists(db, conn)? {
            return Ok(DropOutcome::Missing);
        }
        fs::remove_file(self.dir().join(db))?;
        Ok(DropOutcome::Dropped)
    }

    fn database_exists(&self, db: &str, _conn: &DbConnection) -> Result<bool, AdapterError> {
        Ok(self.dir().join(db).is_file())
    }

    fn wait_ready(&self, conn: &DbConnection, _max_wait: Duration) -> Result<(), AdapterError> {
        if self.root.join(UNREACHABLE_MARKER).exists() {
            return Err(AdapterError::ConnectionFailed(format!(
                "mock server {}:{}",
                conn.host, conn.port
            )));
        }
        Ok(())
    }

    fn url(&self, db: &str, _conn: &DbConnection) -> String {
        format!("mock://{db}")
    }
}

/// Records applied and pending migrations per environment in a text file.
pub struct MockMigrator {
    root: PathBuf,
}

impl MockMigrator {
    pub fn with_root(state_dir: &Path) -> Self {
        Self {
            root: mock_root(state_dir).join("migrations"),
        }
    }

    fn log(&self, env: &str) -> PathBuf {
        self.root.join(format!("{env}.log"))
    }

    fn read(&self, env: &str) -> Result<Vec<String>, AdapterError> {
        let path = self.log(env);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(fs::read_to_string(path)?
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn write(&self, env: &str, lines: &[String]) -> Result<(), AdapterError> {
        fs::create_dir_all(&self.root)?;
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(self.log(env), content)?;
        Ok(())
    }

    /// Number of `run` invocations recorded for `env`.
    pub fn runs(&self, env: &str) -> Result<usize, AdapterError> {
        Ok(self.read(env)?.iter().filter(|l| *l == "run").count())
    }
}

impl Migrator for MockMigrator {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn run(&self, _project_root: &Path, env: &MigrationEnv<'_>) -> Result<(), AdapterError> {
        let mut lines = self.read(env.name)?;
        lines.push("run".to_owned());
        self.write(env.name, &lines)
    }

    fn add(
        &self,
        _project_root: &Path,
        env: &MigrationEnv<'_>,
        migration: &str,
    ) -> Result<Capability<()>, AdapterError> {
        let mut lines = self.read(env.name)?;
        lines.push(format!("add {migration}"));
        self.write(env.name, &lines)?;
        Ok(Capability::Supported(()))
    }

    fn remove(
        &self,
        _project_root: &Path,
        env: &MigrationEnv<'_>,
    ) -> Result<Capability<()>, AdapterError> {
        let mut lines = self.read(env.name)?;
        if let Some(pos) = lines.iter().rposition(|l| l.starts_with("add ")) {
            lines.remove(pos);
            self.write(env.name, &lines)?;
        }
        Ok(Capability::Supported(()))
    }

    fn list(
        &self,
        _project_root: &Path,
        env: &MigrationEnv<'_>,
    ) -> Result<Capability<Vec<String>>, AdapterError> {
        let added = self
            .read(env.name)?
            .into_iter()
            .filter_map(|l| l.strip_prefix("add ").map(str::to_owned))
            .collect();
        Ok(Capability::Supported(added))
    }
}

pub struct MockStorage {
    root: PathBuf,
}

impl MockStorage {
    pub fn with_root(state_dir: &Path) -> Self {
        Self {
            root: mock_root(state_dir).join("containers"),
        }
    }

    pub fn containers(&self) -> Result<Vec<String>, AdapterError> {
        entries(&self.root)
    }
}

impl StorageBackend for MockStorage {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create_container(&self, name: &str, conn: &StorageConnection) -> Result<(), AdapterError> {
        if self.container_exists(name, conn)? {
            return Err(AdapterError::CommandFailed {
                tool: "mock storage".to_owned(),
                detail: format!("container '{name}' already exists"),
            });
        }
        fs::create_dir_all(&self.root)?;
        fs::write(self.root.join(name), "")?;
        Ok(())
    }

    fn delete_container(&self, name: &str, _conn: &StorageConnection) -> Result<(), AdapterError> {
        let path = self.root.join(name);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn container_exists(&self, name: &str, _conn: &StorageConnection) -> Result<bool, AdapterError> {
        Ok(self.root.join(name).is_file())
    }
}

/// Browser sessions as `<env>` files holding `<port> <url>`.
pub struct MockBrowser {
    root: PathBuf,
}

impl MockBrowser {
    pub fn with_root(state_dir: &Path) -> Self {
        Self {
            root: mock_root(state_dir),
        }
    }

    fn sessions(&self) -> PathBuf {
        self.root.join("browser")
    }

    /// `(port, url)` of the running session for `env`, if any.
    pub fn session(&self, env: &str) -> Result<Option<(u16, String)>, AdapterError> {
        let path = self.sessions().join(env);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(content.trim().split_once(' ').and_then(|(port, url)| {
            port.parse().ok().map(|p| (p, url.to_owned()))
        }))
    }
}

impl BrowserBackend for MockBrowser {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn check_conflicts(&self) -> Result<Option<String>, AdapterError> {
        Ok(self
            .root
            .join(CONFLICT_MARKER)
            .exists()
            .then(|| "mock browser already running".to_owned()))
    }

    fn start(&self, env: &str, debug_port: u16, start_url: &str) -> Result<(), AdapterError> {
        fs::create_dir_all(self.sessions())?;
        fs::write(self.sessions().join(env), format!("{debug_port} {start_url}"))?;
        Ok(())
    }

    fn stop(&self, env: &str) -> Result<(), AdapterError> {
        let path = self.sessions().join(env);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> DbConnection {
        DbConnection {
            host: "localhost".to_owned(),
            port: 5432,
            user: "postgres".to_owned(),
            password: String::new(),
        }
    }

    #[test]
    fn database_state_is_shared_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        MockDatabase::with_root(dir.path())
            .create_database("shop_feature", &conn())
            .unwrap();

        let other = MockDatabase::with_root(dir.path());
        assert!(other.database_exists("shop_feature", &conn()).unwrap());
        assert_eq!(other.databases().unwrap(), ["shop_feature"]);
    }

    #[test]
    fn database_create_twice_is_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let db = MockDatabase::with_root(dir.path());
        db.create_database("shop_x", &conn()).unwrap();
        let err = db.create_database("shop_x", &conn()).unwrap_err();
        assert!(matches!(err, AdapterError::AlreadyExists(_)));
    }

    #[test]
    fn database_drop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = MockDatabase::with_root(dir.path());
        db.create_database("shop_x", &conn()).unwrap();
        assert_eq!(db.drop_database("shop_x", &conn()).unwrap(), DropOutcome::Dropped);
        assert_eq!(db.drop_database("shop_x", &conn()).unwrap(), DropOutcome::Missing);
    }

    #[test]
    fn unreachable_marker_fails_wait_ready() {
        let dir = tempfile::tempdir().unwrap();
        let db = MockDatabase::with_root(dir.path());
        assert!(db.wait_ready(&conn(), Duration::from_secs(1)).is_ok());
        fs::create_dir_all(dir.path().join("mock")).unwrap();
        fs::write(dir.path().join("mock").join(UNREACHABLE_MARKER), "").unwrap();
        assert!(matches!(
            db.wait_ready(&conn(), Duration::from_secs(1)),
            Err(AdapterError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn migrator_supports_every_capability() {
        let dir = tempfile::tempdir().unwrap();
        let m = MockMigrator::with_root(dir.path());
        let env = MigrationEnv {
            name: "feature",
            database_url: "mock://shop_feature",
        };
        m.run(dir.path(), &env).unwrap();
        m.add(dir.path(), &env, "create_users").unwrap();
        m.add(dir.path(), &env, "add_index").unwrap();
        m.remove(dir.path(), &env).unwrap();

        assert_eq!(m.runs("feature").unwrap(), 1);
        assert_eq!(
            m.list(dir.path(), &env).unwrap(),
            Capability::Supported(vec!["create_users".to_owned()])
        );
    }

    #[test]
    fn browser_session_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let b = MockBrowser::with_root(dir.path());
        assert!(b.check_conflicts().unwrap().is_none());
        b.start("feature", 9230, "https://localhost:3008").unwrap();
        assert_eq!(
            b.session("feature").unwrap(),
            Some((9230, "https://localhost:3008".to_owned()))
        );
        b.stop("feature").unwrap();
        b.stop("feature").unwrap();
        assert!(b.session("feature").unwrap().is_none());
    }

    #[test]
    fn browser_conflict_marker() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("mock")).unwrap();
        fs::write(dir.path().join("mock").join(CONFLICT_MARKER), "").unwrap();
        assert!(MockBrowser::with_root(dir.path())
            .check_conflicts()
            .unwrap()
            .is_some());
    }
}
