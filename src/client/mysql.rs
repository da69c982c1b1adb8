use super::{render_script, ClientError, Secret, SqlClient, Statement};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// [`SqlClient`] backed by the installation's `mysql` binary, connecting as
/// root over the unix socket.
///
/// Passwords are never placed in argv: root authentication goes through an
/// option file passed with `--defaults-extra-file`, and statements carrying
/// secrets are piped over stdin.
#[derive(Debug, Clone)]
pub struct MysqlCli {
    program: PathBuf,
    socket: PathBuf,
    user: String,
    auth_file: Option<PathBuf>,
    timeout: Duration,
}

impl MysqlCli {
    pub fn new(program: impl Into<PathBuf>, socket: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            socket: socket.into(),
            user: "root".to_string(),
            auth_file: None,
            timeout,
        }
    }

    /// Authenticate with the password stored in `auth_file`
    /// (see [`write_auth_file`]).
    pub fn with_auth_file(mut self, auth_file: impl Into<PathBuf>) -> Self {
        self.auth_file = Some(auth_file.into());
        self
    }

    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        // Must come first or the client rejects it.
        if let Some(ref auth) = self.auth_file {
            args.push(format!("--defaults-extra-file={}", auth.display()));
        }
        args.push(format!("--socket={}", self.socket.display()));
        args.push(format!("--user={}", self.user));
        args.push("--batch".to_string());
        args.push("--skip-column-names".to_string());
        args
    }

    async fn run(&self, statements: &[Statement]) -> std::result::Result<Vec<String>, ClientError> {
        let script = render_script(statements);
        let via_stdin = statements.iter().any(Statement::carries_secret);

        let mut cmd = Command::new(&self.program);
        cmd.args(self.args())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if via_stdin {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.arg("-e").arg(&script).stdin(Stdio::null());
        }

        let program = self.program.display().to_string();
        let mut child = cmd
            .spawn()
            .map_err(|e| ClientError::exec_failed(program.clone(), e))?;

        if via_stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(script.as_bytes())
                    .await
                    .map_err(|e| ClientError::exec_failed(program.clone(), e))?;
                // Dropping closes the pipe so the client sees EOF.
                drop(stdin);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ClientError::exec_failed(program, e))?;

        if !output.status.success() {
            return Err(ClientError::failed(&output));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl SqlClient for MysqlCli {
    async fn execute(&self, statements: &[Statement]) -> std::result::Result<Vec<String>, ClientError> {
        tracing::debug!(
            statements = ?statements.iter().map(Statement::label).collect::<Vec<_>>(),
            socket = %self.socket.display(),
            "Running client"
        );
        match tokio::time::timeout(self.timeout, self.run(statements)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::timeout(self.timeout)),
        }
    }
}

/// Write a `[client]` option file holding the root password, readable only
/// by the current user. Replaces any existing file.
pub fn write_auth_file(path: &Path, password: &Secret) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let escaped = password
        .expose()
        .replace('\\', "\\\\")
        .replace('"', "\\\"");

    let _ = std::fs::remove_file(path);
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| {
            Error::Credentials(format!(
                "cannot create client option file {}: {}",
                path.display(),
                e
            ))
        })?;
    writeln!(file, "[client]\npassword=\"{}\"", escaped)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn auth_file_comes_first_in_args() {
        let cli = MysqlCli::new("/opt/mysql/bin/mysql", "/run/db/mysql.sock", Duration::from_secs(5))
            .with_auth_file("/run/db/client.cnf");
        let args = cli.args();
        assert_eq!(args[0], "--defaults-extra-file=/run/db/client.cnf");
        assert!(args.contains(&"--socket=/run/db/mysql.sock".to_string()));
        assert!(args.contains(&"--user=root".to_string()));
    }

    #[test]
    fn auth_file_is_private_and_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.cnf");
        write_auth_file(&path, &Secret::new("a\"b\\c")).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "[client]\npassword=\"a\\\"b\\\\c\"\n");
    }

    #[tokio::test]
    async fn missing_binary_is_exec_failure() {
        let cli = MysqlCli::new("/nonexistent/mysql", "/tmp/none.sock", Duration::from_secs(5));
        let err = cli.execute(&[Statement::Ping]).await.unwrap_err();
        assert!(matches!(err, ClientError::ExecFailed { .. }));
    }

    #[tokio::test]
    async fn rows_come_from_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("mysql");
        std::fs::write(&script, "#!/bin/sh\nprintf 'information_schema\\nshop\\n'\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cli = MysqlCli::new(&script, dir.path().join("mysql.sock"), Duration::from_secs(5));
        let rows = cli.execute(&[Statement::ShowDatabases]).await.unwrap();
        assert_eq!(rows, vec!["information_schema", "shop"]);
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("mysql");
        std::fs::write(&script, "#!/bin/sh\necho 'ERROR 2002 (HY000): no socket' >&2\nexit 1\n")
            .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cli = MysqlCli::new(&script, dir.path().join("mysql.sock"), Duration::from_secs(5));
        let err = cli.execute(&[Statement::Ping]).await.unwrap_err();
        assert!(err.to_string().contains("ERROR 2002"), "got: {}", err);
    }
}
