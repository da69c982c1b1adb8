use super::state::{FailureReason, ReadinessState};
use crate::client::{SqlClient, Statement};
use crate::config::{duration_field, ProbeConfig};
use crate::error::{Error, ProbeFailure, Result};
use crate::service::ServerProcess;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(3);
const DEFAULT_QUERY_BACKOFF: Duration = Duration::from_secs(2);
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolved probe bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub settle_delay: Duration,
    pub query_retries: u32,
    pub query_backoff: Duration,
    pub query_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: 90,
            settle_delay: DEFAULT_SETTLE_DELAY,
            query_retries: 6,
            query_backoff: DEFAULT_QUERY_BACKOFF,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl ProbeSettings {
    pub fn from_config(probe: &ProbeConfig) -> Result<Self> {
        Ok(Self {
            poll_interval: duration_field(
                probe.poll_interval.as_deref(),
                "probe.poll_interval",
                DEFAULT_POLL_INTERVAL,
            )?,
            max_attempts: probe.max_attempts,
            settle_delay: duration_field(
                probe.settle_delay.as_deref(),
                "probe.settle_delay",
                DEFAULT_SETTLE_DELAY,
            )?,
            query_retries: probe.query_retries,
            query_backoff: duration_field(
                probe.query_backoff.as_deref(),
                "probe.query_backoff",
                DEFAULT_QUERY_BACKOFF,
            )?,
            query_timeout: duration_field(
                probe.query_timeout.as_deref(),
                "probe.query_timeout",
                DEFAULT_QUERY_TIMEOUT,
            )?,
        })
    }
}

/// Outcome of a successful probe.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// Every state visited, in order, ending in `QueryReady`.
    pub history: Vec<ReadinessState>,
    pub socket_polls: u32,
    pub query_attempts: u32,
    pub elapsed: Duration,
}

/// Drives a launched server through the readiness state machine.
///
/// Polls and queries run strictly one after another; every wait observes the
/// cancellation token.
pub struct ReadinessProber<'a> {
    settings: ProbeSettings,
    socket_path: PathBuf,
    error_log: PathBuf,
    client: &'a dyn SqlClient,
    cancel: CancellationToken,
    state: ReadinessState,
    history: Vec<ReadinessState>,
}

impl<'a> ReadinessProber<'a> {
    pub fn new(
        settings: ProbeSettings,
        socket_path: impl Into<PathBuf>,
        error_log: impl Into<PathBuf>,
        client: &'a dyn SqlClient,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            socket_path: socket_path.into(),
            error_log: error_log.into(),
            client,
            cancel,
            state: ReadinessState::Starting,
            history: vec![ReadinessState::Starting],
        }
    }

    pub fn state(&self) -> &ReadinessState {
        &self.state
    }

    fn advance(&mut self, next: ReadinessState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "illegal readiness transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(from = %self.state, to = %next, "Readiness transition");
        self.history.push(next.clone());
        self.state = next;
    }

    async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Interrupted),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn process_exited(&mut self, process: &ServerProcess) -> Error {
        let exit_code = process.exit_code();
        self.advance(ReadinessState::Failed(FailureReason::ProcessExited { exit_code }));
        Error::Probe(ProbeFailure::ProcessExited {
            exit_code,
            diagnostics: process.log_tails(&self.error_log),
        })
    }

    /// Run the probe to a terminal state. `Ok` means `QueryReady`.
    #[tracing::instrument(skip_all, fields(pid = process.pid()))]
    pub async fn probe(&mut self, process: &mut ServerProcess) -> Result<ProbeReport> {
        let started = Instant::now();
        let socket_polls = self.wait_for_socket(process).await?;
        tracing::info!(
            polls = socket_polls,
            "Server socket ready at {}",
            self.socket_path.display()
        );

        self.pause(self.settings.settle_delay).await?;
        let query_attempts = self.wait_for_query(process).await?;

        let elapsed = started.elapsed();
        tracing::info!(
            attempts = query_attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "Server accepts queries"
        );
        Ok(ProbeReport {
            history: self.history.clone(),
            socket_polls,
            query_attempts,
            elapsed,
        })
    }

    async fn wait_for_socket(&mut self, process: &mut ServerProcess) -> Result<u32> {
        let max = self.settings.max_attempts;
        for attempt in 1..=max {
            if !process.is_alive() {
                return Err(self.process_exited(process));
            }
            if self.socket_path.exists() {
                self.advance(ReadinessState::SocketReady);
                return Ok(attempt);
            }
            tracing::debug!(attempt, max, "Waiting for server socket");
            self.pause(self.settings.poll_interval).await?;
        }

        // The last interval has elapsed; the bound covers max * poll_interval.
        if !process.is_alive() {
            return Err(self.process_exited(process));
        }
        if self.socket_path.exists() {
            self.advance(ReadinessState::SocketReady);
            return Ok(max);
        }
        self.advance(ReadinessState::TimedOut);
        Err(Error::Probe(ProbeFailure::Timeout { attempts: max }))
    }

    async fn wait_for_query(&mut self, process: &mut ServerProcess) -> Result<u32> {
        let retries = self.settings.query_retries;
        let mut last_error = String::new();
        for attempt in 1..=retries {
            if !process.is_alive() {
                return Err(self.process_exited(process));
            }
            match self.client.execute(&[Statement::Ping]).await {
                Ok(_) => {
                    self.advance(ReadinessState::QueryReady);
                    return Ok(attempt);
                }
                Err(e) => {
                    tracing::debug!(attempt, retries, "Query probe failed: {}", e);
                    last_error = e.to_string();
                }
            }
            if attempt < retries {
                self.pause(self.settings.query_backoff).await?;
            }
        }

        // One more look so a crash is not misreported as refused connections.
        if !process.is_alive() {
            return Err(self.process_exited(process));
        }
        self.advance(ReadinessState::Failed(FailureReason::ConnectionRefused {
            attempts: retries,
        }));
        Err(Error::Probe(ProbeFailure::ConnectionRefused {
            attempts: retries,
            last_error,
        }))
    }
}
