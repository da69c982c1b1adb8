use std::fmt;
use std::time::Duration;

/// Structured error type for client binary invocations.
///
/// Callers map these into stage errors: the readiness probe treats every
/// variant as "not ready yet", the bootstrap stage surfaces the text as-is.
#[derive(Debug)]
pub enum ClientError {
    /// Client did not finish within its per-call bound.
    Timeout { timeout: Duration },

    /// Client ran but returned non-zero exit.
    CommandFailed {
        stderr: String,
        exit_code: Option<i32>,
    },

    /// Client binary couldn't be executed (missing, permission denied).
    ExecFailed { program: String, source: std::io::Error },
}

impl ClientError {
    pub fn timeout(timeout: Duration) -> Self {
        ClientError::Timeout { timeout }
    }

    /// Create a command-failed error from an `std::process::Output`.
    pub fn failed(output: &std::process::Output) -> Self {
        ClientError::CommandFailed {
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            exit_code: output.status.code(),
        }
    }

    pub fn exec_failed(program: impl Into<String>, source: std::io::Error) -> Self {
        ClientError::ExecFailed {
            program: program.into(),
            source,
        }
    }

    /// Whether the server rejected the credentials (MySQL error 1045).
    pub fn is_access_denied(&self) -> bool {
        matches!(self, ClientError::CommandFailed { stderr, .. } if stderr.contains("ERROR 1045"))
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Timeout { timeout } => {
                write!(f, "client timed out after {:?}", timeout)
            }
            ClientError::CommandFailed { stderr, exit_code } => {
                let code = exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                if stderr.is_empty() {
                    write!(f, "client exited with {}", code)
                } else {
                    write!(f, "client exited with {}: {}", code, stderr)
                }
            }
            ClientError::ExecFailed { program, source } => {
                write!(f, "cannot execute '{}': {}", program, source)
            }
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::ExecFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_keeps_server_error_text() {
        let err = ClientError::CommandFailed {
            stderr: "ERROR 2002 (HY000): Can't connect to local MySQL server".to_string(),
            exit_code: Some(1),
        };
        assert_eq!(
            err.to_string(),
            "client exited with 1: ERROR 2002 (HY000): Can't connect to local MySQL server"
        );
        assert!(!err.is_access_denied());
    }

    #[test]
    fn access_denied_is_detected() {
        let err = ClientError::CommandFailed {
            stderr: "ERROR 1045 (28000): Access denied for user 'root'@'localhost'".to_string(),
            exit_code: Some(1),
        };
        assert!(err.is_access_denied());
    }
}
