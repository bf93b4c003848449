//! PostgreSQL backend driven through `psql` and `pg_isready`.

use crate::database::{poll_ready, url_with_credentials, DatabaseBackend, DbConnection, DropOutcome};
use crate::exec::{capture, run_tool, stdout_string};
use crate::AdapterError;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct PostgresBackend;

impl Default for PostgresBackend {
    fn default() -> Self {
        Self
    }
}

impl PostgresBackend {
    pub fn new() -> Self {
        Self
    }

    fn psql(conn: &DbConnection, sql: &str) -> Command {
        let mut cmd = Command::new("psql");
        cmd.args([
            "-h",
            &conn.host,
            "-p",
            &conn.port.to_string(),
            "-U",
            &conn.user,
            "-d",
            "postgres",
            "-v",
            "ON_ERROR_STOP=1",
            "-tAc",
            sql,
        ]);
        if !conn.password.is_empty() {
            cmd.env("PGPASSWORD", &conn.password);
        }
        cmd
    }

    fn query(conn: &DbConnection, sql: &str) -> Result<String, AdapterError> {
        let output = run_tool("psql", &mut Self::psql(conn, sql))?;
        Ok(stdout_string(&output))
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl DatabaseBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn create_database(&self, db: &str, conn: &DbConnection) -> Result<(), AdapterError> {
        if self.database_exists(db, conn)? {
            return Err(AdapterError::AlreadyExists(db.to_owned()));
        }
        Self::query(conn, &format!("CREATE DATABASE {}", quote_ident(db)))?;
        info!("created database {db}");
        Ok(())
    }

    fn drop_database(&self, db: &str, conn: &DbConnection) -> Result<DropOutcome, AdapterError> {
        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = {} AND pid <> pg_backend_pid()",
            quote_literal(db)
        );
        if let Err(e) = Self::query(conn, &terminate) {
            debug!("terminating connections to {db} failed: {e}");
        }

        if !self.database_exists(db, conn)? {
            warn!("database {db} does not exist, nothing to drop");
            return Ok(DropOutcome::Missing);
        }
        Self::query(conn, &format!("DROP DATABASE IF EXISTS {}", quote_ident(db)))?;
        info!("dropped database {db}");
        Ok(DropOutcome::Dropped)
    }

    fn database_exists(&self, db: &str, conn: &DbConnection) -> Result<bool, AdapterError> {
        let out = Self::query(
            conn,
            &format!(
                "SELECT 1 FROM pg_database WHERE datname = {}",
                quote_literal(db)
            ),
        )?;
        Ok(out == "1")
    }

    fn wait_ready(&self, conn: &DbConnection, max_wait: Duration) -> Result<(), AdapterError> {
        let target = format!("postgres at {}:{}", conn.host, conn.port);
        poll_ready(&target, max_wait, Duration::from_millis(500), || {
            let output = capture(
                "pg_isready",
                Command::new("pg_isready").args([
                    "-h",
                    &conn.host,
                    "-p",
                    &conn.port.to_string(),
                    "-U",
                    &conn.user,
                    "-t",
                    "1",
                ]),
            )?;
            // 0 accepting, 1 rejecting (starting up), 2 no response, 3 bad parameters
            match output.status.code() {
                Some(0) => Ok(true),
                Some(1 | 2) => Ok(false),
                _ => Err(AdapterError::ConnectionFailed(format!(
                    "{target}: {}",
                    String::from_utf8_lossy(&output.stdout).trim()
                ))),
            }
        })
    }

    fn url(&self, db: &str, conn: &DbConnection) -> String {
        url_with_credentials("postgres", db, conn)
    }
}
