use crate::exec::{capture, failure, run_tool, stdout_string};
use crate::AdapterError;
use sprig_schema::{expand, StorageSection, Vars};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Where containers live: a connection string (azure) or profile (s3), plus
/// an optional endpoint override for local emulators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConnection {
    pub connection: String,
    pub endpoint: Option<String>,
}

impl StorageConnection {
    pub fn from_section(section: &StorageSection) -> Self {
        Self {
            connection: section.connection.clone(),
            endpoint: section.endpoint.clone(),
        }
    }
}

pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &str;

    fn create_container(&self, name: &str, conn: &StorageConnection) -> Result<(), AdapterError>;

    fn delete_container(&self, name: &str, conn: &StorageConnection) -> Result<(), AdapterError>;

    fn container_exists(&self, name: &str, conn: &StorageConnection)
        -> Result<bool, AdapterError>;
}

pub fn select_storage(name: &str, state_dir: &Path) -> Result<Box<dyn StorageBackend>, AdapterError> {
    match name {
        "azure" => Ok(Box::new(AzureBlobBackend)),
        "s3" => Ok(Box::new(S3Backend)),
        "mock" => Ok(Box::new(crate::mock::MockStorage::with_root(state_dir))),
        other => Err(AdapterError::UnknownBackend {
            family: "storage",
            name: other.to_owned(),
            expected: "azure, s3, mock",
        }),
    }
}

/// Expand `{env}` in each container pattern.
pub fn container_names(patterns: &[String], env: &str) -> Vec<String> {
    let vars = Vars::new().with("env", env);
    patterns.iter().map(|p| expand(p, &vars)).collect()
}

/// Per-container outcome of a bulk operation.
#[derive(Debug)]
pub struct ContainerResult {
    pub container: String,
    pub result: Result<(), AdapterError>,
}

pub fn create_containers(
    backend: &dyn StorageBackend,
    patterns: &[String],
    env: &str,
    conn: &StorageConnection,
) -> Vec<ContainerResult> {
    container_names(patterns, env)
        .into_iter()
        .map(|container| {
            let result = backend.create_container(&container, conn);
            ContainerResult { container, result }
        })
        .collect()
}

/// Delete every container the patterns name; containers that are already
/// gone count as deleted.
pub fn delete_containers(
    backend: &dyn StorageBackend,
    patterns: &[String],
    env: &str,
    conn: &StorageConnection,
) -> Vec<ContainerResult> {
    container_names(patterns, env)
        .into_iter()
        .map(|container| {
            let result = match backend.container_exists(&container, conn) {
                Ok(false) => {
                    debug!("container {container} does not exist, skipping");
                    Ok(())
                }
                Ok(true) => backend.delete_container(&container, conn),
                Err(e) => Err(e),
            };
            ContainerResult { container, result }
        })
        .collect()
}

/// Azure Blob Storage (or Azurite) through `az storage container`.
pub struct AzureBlobBackend;

impl AzureBlobBackend {
    fn command(verb: &str, name: &str, conn: &StorageConnection) -> Command {
        let mut cmd = Command::new("az");
        cmd.args(["storage", "container", verb, "--name", name, "--only-show-errors"]);
        if !conn.connection.is_empty() {
            cmd.args(["--connection-string", &conn.connection]);
        }
        if let Some(endpoint) = &conn.endpoint {
            cmd.args(["--blob-endpoint", endpoint]);
        }
        cmd
    }
}

impl StorageBackend for AzureBlobBackend {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn create_container(&self, name: &str, conn: &StorageConnection) -> Result<(), AdapterError> {
        run_tool("az", &mut Self::command("create", name, conn))?;
        info!("created blob container {name}");
        Ok(())
    }

    fn delete_container(&self, name: &str, conn: &StorageConnection) -> Result<(), AdapterError> {
        run_tool("az", &mut Self::command("delete", name, conn))?;
        info!("deleted blob container {name}");
        Ok(())
    }

    fn container_exists(&self, name: &str, conn: &StorageConnection) -> Result<bool, AdapterError> {
        let mut cmd = Self::command("exists", name, conn);
        cmd.args(["--query", "exists", "--output", "tsv"]);
        let output = run_tool("az", &mut cmd)?;
        Ok(stdout_string(&output) == "true")
    }
}

/// S3-compatible buckets through the `aws` CLI. The connection string, when
/// set, names the AWS profile.
pub struct S3Backend;

impl S3Backend {
    fn command(conn: &StorageConnection, args: &[&str]) -> Command {
        let mut cmd = Command::new("aws");
        cmd.args(args);
        if !conn.connection.is_empty() {
            cmd.args(["--profile", &conn.connection]);
        }
        if let Some(endpoint) = &conn.endpoint {
            cmd.args(["--endpoint-url", endpoint]);
        }
        cmd
    }
}

impl StorageBackend for S3Backend {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn create_container(&self, name: &str, conn: &StorageConnection) -> Result<(), AdapterError> {
        run_tool(
            "aws",
            &mut Self::command(conn, &["s3api", "create-bucket", "--bucket", name]),
        )?;
        info!("created bucket {name}");
        Ok(())
    }

    fn delete_container(&self, name: &str, conn: &StorageConnection) -> Result<(), AdapterError> {
        let target = format!("s3://{name}");
        run_tool("aws", &mut Self::command(conn, &["s3", "rb", &target, "--force"]))?;
        info!("deleted bucket {name}");
        Ok(())
    }

    fn container_exists(&self, name: &str, conn: &StorageConnection) -> Result<bool, AdapterError> {
        let output = capture(
            "aws",
            &mut Self::command(conn, &["s3api", "head-bucket", "--bucket", name]),
        )?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("404") || stderr.contains("Not Found") || stderr.contains("NoSuchBucket")
        {
            Ok(false)
        } else {
            Err(failure("aws", &output))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockStorage;

    fn patterns() -> Vec<String> {
        vec!["{env}-uploads".to_owned(), "media-{env}".to_owned()]
    }

    #[test]
    fn container_names_expand_env() {
        assert_eq!(
            container_names(&patterns(), "fix-bug-86"),
            ["fix-bug-86-uploads", "media-fix-bug-86"]
        );
    }

    #[test]
    fn select_storage_backends() {
        let dir = tempfile::tempdir().unwrap();
        assert!(select_storage("azure", dir.path()).is_ok());
        assert!(select_storage("s3", dir.path()).is_ok());
        assert!(select_storage("mock", dir.path()).is_ok());
        assert!(select_storage("gcs", dir.path()).is_err());
    }

    #[test]
    fn bulk_create_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockStorage::with_root(dir.path());
        let conn = StorageConnection::default();

        let created = create_containers(&backend, &patterns(), "feature", &conn);
        assert!(created.iter().all(|r| r.result.is_ok()));
        assert!(backend.container_exists("feature-uploads", &conn).unwrap());

        let deleted = delete_containers(&backend, &patterns(), "feature", &conn);
        assert!(deleted.iter().all(|r| r.result.is_ok()));
        assert!(!backend.container_exists("feature-uploads", &conn).unwrap());
    }

    #[test]
    fn bulk_create_reports_each_failure() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockStorage::with_root(dir.path());
        let conn = StorageConnection::default();
        backend.create_container("feature-uploads", &conn).unwrap();

        let created = create_containers(&backend, &patterns(), "feature", &conn);
        assert_eq!(created.len(), 2);
        assert!(created[0].result.is_err());
        assert!(created[1].result.is_ok());
    }

    #[test]
    fn delete_of_missing_containers_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockStorage::with_root(dir.path());
        let deleted =
            delete_containers(&backend, &patterns(), "ghost", &StorageConnection::default());
        assert!(deleted.iter().all(|r| r.result.is_ok()));
    }

    #[test]
    fn azure_command_includes_connection_string() {
        let conn = StorageConnection {
            connection: "UseDevelopmentStorage=true".to_owned(),
            endpoint: None,
        };
        let cmd = AzureBlobBackend::command("create", "x-uploads", &conn);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.windows(2).any(|w| w == ["--name", "x-uploads"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["--connection-string", "UseDevelopmentStorage=true"]));
    }
}
