//! MySQL / MariaDB backend driven through `mysql` and `mysqladmin`.

use crate::database::{poll_ready, url_with_credentials, DatabaseBackend, DbConnection, DropOutcome};
use crate::exec::{capture, run_tool, stdout_string};
use crate::AdapterError;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct MysqlBackend;

impl Default for MysqlBackend {
    fn default() -> Self {
        Self
    }
}

impl MysqlBackend {
    pub fn new() -> Self {
        Self
    }

    fn client(tool: &str, conn: &DbConnection) -> Command {
        let mut cmd = Command::new(tool);
        cmd.args([
            "-h",
            &conn.host,
            "-P",
            &conn.port.to_string(),
            "-u",
            &conn.user,
        ]);
        if !conn.password.is_empty() {
            cmd.env("MYSQL_PWD", &conn.password);
        }
        cmd
    }

    fn query(conn: &DbConnection, sql: &str) -> Result<String, AdapterError> {
        let mut cmd = Self::client("mysql", conn);
        cmd.args(["-N", "-B", "-e", sql]);
        let output = run_tool("mysql", &mut cmd)?;
        Ok(stdout_string(&output))
    }
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

impl DatabaseBackend for MysqlBackend {
    fn name(&self) -> &'static str {
        "mysql"
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
        let ids = Self::query(
            conn,
            &format!(
                "SELECT ID FROM information_schema.PROCESSLIST \
                 WHERE DB = {} AND ID <> CONNECTION_ID()",
                quote_literal(db)
            ),
        )
        .unwrap_or_default();
        for id in ids
            .lines()
            .filter(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_digit()))
        {
            if let Err(e) = Self::query(conn, &format!("KILL {id}")) {
                debug!("killing connection {id} to {db} failed: {e}");
            }
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
                "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = {}",
                quote_literal(db)
            ),
        )?;
        Ok(out == db)
    }

    fn wait_ready(&self, conn: &DbConnection, max_wait: Duration) -> Result<(), AdapterError> {
        let target = format!("mysql at {}:{}", conn.host, conn.port);
        poll_ready(&target, max_wait, Duration::from_millis(500), || {
            let mut cmd = Self::client("mysqladmin", conn);
            cmd.args(["--connect-timeout=1", "ping"]);
            let output = capture("mysqladmin", &mut cmd)?;
            let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
            if output.status.success() {
                Ok(true)
            } else if stderr.contains("access denied") {
                Err(AdapterError::ConnectionFailed(format!(
                    "{target}: access denied for user {}",
                    conn.user
                )))
            } else {
                Ok(false)
            }
        })
    }

    fn url(&self, db: &str, conn: &DbConnection) -> String {
        url_with_credentials("mysql", db, conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_delimiters() {
        assert_eq!(quote_ident("shop_x"), "`shop_x`");
        assert_eq!(quote_ident("a`b"), "`a``b`");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn client_passes_password_through_environment() {
        let conn = DbConnection {
            host: "127.0.0.1".to_owned(),
            port: 3306,
            user: "root".to_owned(),
            password: "pw".to_owned(),
        };
        let cmd = MysqlBackend::client("mysql", &conn);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(!args.iter().any(|a| a.contains("pw")));
        assert!(cmd
            .get_envs()
            .any(|(k, v)| k == "MYSQL_PWD" && v.is_some_and(|v| v == "pw")));
    }

    #[test]
    fn url_uses_mysql_scheme() {
        let conn = DbConnection {
            host: "localhost".to_owned(),
            port: 3306,
            user: "root".to_owned(),
            password: "pw".to_owned(),
        };
        assert_eq!(
            MysqlBackend::new().url("shop_x", &conn),
            "mysql://root:pw@localhost:3306/shop_x"
        );
    }
}
