//! Readiness probing against real child processes and a scripted SQL client.

use async_trait::async_trait;
use service_bringup::client::{ClientError, SqlClient, Statement};
use service_bringup::readiness::{FailureReason, ProbeSettings, ReadinessProber, ReadinessState};
use service_bringup::service::ServerProcess;
use service_bringup::{Error, ProbeFailure};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Client that fails until it has been called `succeed_from` times.
struct CountingClient {
    calls: AtomicU32,
    succeed_from: Option<u32>,
}

impl CountingClient {
    fn failing() -> Self {
        Self {
            calls: AtomicU32::new(0),
            succeed_from: None,
        }
    }

    fn succeeding_on(attempt: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            succeed_from: Some(attempt),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlClient for CountingClient {
    async fn execute(&self, _: &[Statement]) -> Result<Vec<String>, ClientError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.succeed_from {
            Some(n) if call >= n => Ok(vec!["1".to_string()]),
            _ => Err(ClientError::CommandFailed {
                stderr: "ERROR 2002 (HY000): Can't connect to local MySQL server through socket"
                    .to_string(),
                exit_code: Some(1),
            }),
        }
    }
}

fn fast_settings() -> ProbeSettings {
    ProbeSettings {
        poll_interval: Duration::from_millis(50),
        max_attempts: 40,
        settle_delay: Duration::ZERO,
        query_retries: 5,
        query_backoff: Duration::from_millis(10),
        query_timeout: Duration::from_secs(1),
    }
}

fn spawn_shell(dir: &Path, script: &str) -> ServerProcess {
    ServerProcess::spawn(
        Path::new("/bin/sh"),
        &["-c".to_string(), script.to_string()],
        &dir.join("stdout.log"),
        &dir.join("stderr.log"),
    )
    .expect("Failed to spawn test process")
}

fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

#[tokio::test]
async fn test_process_exit_is_reported_quickly_with_logs() {
    let dir = create_test_dir();
    let socket = dir.path().join("mysql.sock");
    let client = CountingClient::failing();
    let mut process = spawn_shell(dir.path(), "echo 'mysqld: Can not bind port' >&2; exit 3");

    let started = Instant::now();
    let mut prober = ReadinessProber::new(
        fast_settings(),
        &socket,
        dir.path().join("mysql_error.log"),
        &client,
        CancellationToken::new(),
    );
    let err = prober.probe(&mut process).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(2));
    match err {
        Error::Probe(ProbeFailure::ProcessExited {
            exit_code,
            diagnostics,
        }) => {
            assert_eq!(exit_code, Some(3));
            assert!(diagnostics.contains("Can not bind port"), "{}", diagnostics);
        }
        other => panic!("expected ProcessExited, got {:?}", other),
    }
    assert_eq!(
        prober.state(),
        &ReadinessState::Failed(FailureReason::ProcessExited { exit_code: Some(3) })
    );
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_query_retries_are_bounded() {
    let dir = create_test_dir();
    let socket = dir.path().join("mysql.sock");
    std::fs::write(&socket, "").unwrap();
    let client = CountingClient::failing();
    let mut process = spawn_shell(dir.path(), "sleep 30");

    let mut prober = ReadinessProber::new(
        fast_settings(),
        &socket,
        dir.path().join("mysql_error.log"),
        &client,
        CancellationToken::new(),
    );
    let err = prober.probe(&mut process).await.unwrap_err();
    process.terminate(Duration::from_secs(2)).await.unwrap();

    match err {
        Error::Probe(ProbeFailure::ConnectionRefused {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 5);
            assert!(last_error.contains("ERROR 2002"));
        }
        other => panic!("expected ConnectionRefused, got {:?}", other),
    }
    assert_eq!(client.calls(), 5, "exactly one query per retry");
}

#[tokio::test]
async fn test_missing_socket_times_out_after_max_attempts() {
    let dir = create_test_dir();
    let client = CountingClient::failing();
    let mut process = spawn_shell(dir.path(), "sleep 30");
    let settings = ProbeSettings {
        max_attempts: 4,
        ..fast_settings()
    };

    let started = Instant::now();
    let mut prober = ReadinessProber::new(
        settings,
        dir.path().join("mysql.sock"),
        dir.path().join("mysql_error.log"),
        &client,
        CancellationToken::new(),
    );
    let err = prober.probe(&mut process).await.unwrap_err();
    let elapsed = started.elapsed();
    process.terminate(Duration::from_secs(2)).await.unwrap();

    assert!(matches!(
        err,
        Error::Probe(ProbeFailure::Timeout { attempts: 4 })
    ));
    // Each attempt owns a full poll interval, the last one included.
    assert!(elapsed >= Duration::from_millis(200), "gave up after {:?}", elapsed);
    assert_eq!(prober.state(), &ReadinessState::TimedOut);
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_timeout_waits_out_the_whole_bound() {
    let dir = create_test_dir();
    let client = CountingClient::failing();
    let mut process = spawn_shell(dir.path(), "sleep 30");
    let settings = ProbeSettings {
        poll_interval: Duration::from_millis(100),
        max_attempts: 10,
        ..fast_settings()
    };

    let started = Instant::now();
    let mut prober = ReadinessProber::new(
        settings,
        dir.path().join("mysql.sock"),
        dir.path().join("mysql_error.log"),
        &client,
        CancellationToken::new(),
    );
    let err = prober.probe(&mut process).await.unwrap_err();
    let elapsed = started.elapsed();
    process.terminate(Duration::from_secs(2)).await.unwrap();

    assert!(matches!(
        err,
        Error::Probe(ProbeFailure::Timeout { attempts: 10 })
    ));
    assert!(elapsed >= Duration::from_millis(1000), "gave up after {:?}", elapsed);
}

#[tokio::test]
async fn test_socket_appearing_in_last_interval_is_ready() {
    let dir = create_test_dir();
    let socket = dir.path().join("mysql.sock");
    let client = CountingClient::succeeding_on(1);
    // Socket shows up after the third poll but before the bound runs out.
    let mut process = spawn_shell(
        dir.path(),
        &format!("sleep 0.5; touch '{}'; sleep 30", socket.display()),
    );
    let settings = ProbeSettings {
        poll_interval: Duration::from_millis(200),
        max_attempts: 3,
        ..fast_settings()
    };

    let mut prober = ReadinessProber::new(
        settings,
        &socket,
        dir.path().join("mysql_error.log"),
        &client,
        CancellationToken::new(),
    );
    let report = prober.probe(&mut process).await;
    process.terminate(Duration::from_secs(2)).await.unwrap();

    let report = report.unwrap();
    assert_eq!(report.socket_polls, 3);
    assert_eq!(prober.state(), &ReadinessState::QueryReady);
}

#[tokio::test]
async fn test_ready_after_transient_query_failures() {
    let dir = create_test_dir();
    let socket = dir.path().join("mysql.sock");
    std::fs::write(&socket, "").unwrap();
    let client = CountingClient::succeeding_on(3);
    let mut process = spawn_shell(dir.path(), "sleep 30");

    let mut prober = ReadinessProber::new(
        fast_settings(),
        &socket,
        dir.path().join("mysql_error.log"),
        &client,
        CancellationToken::new(),
    );
    let report = prober.probe(&mut process).await.unwrap();
    process.terminate(Duration::from_secs(2)).await.unwrap();

    assert_eq!(report.socket_polls, 1);
    assert_eq!(report.query_attempts, 3);
    assert_eq!(
        report.history,
        vec![
            ReadinessState::Starting,
            ReadinessState::SocketReady,
            ReadinessState::QueryReady
        ]
    );
}

#[tokio::test]
async fn test_cancellation_interrupts_socket_wait() {
    let dir = create_test_dir();
    let client = CountingClient::failing();
    let mut process = spawn_shell(dir.path(), "sleep 30");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut prober = ReadinessProber::new(
        fast_settings(),
        dir.path().join("mysql.sock"),
        dir.path().join("mysql_error.log"),
        &client,
        cancel,
    );
    let err = prober.probe(&mut process).await.unwrap_err();
    process.terminate(Duration::from_secs(2)).await.unwrap();

    assert!(matches!(err, Error::Interrupted));
}
