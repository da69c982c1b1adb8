use std::fmt;

/// Why a probe ended in [`ReadinessState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    ProcessExited { exit_code: Option<i32> },
    ConnectionRefused { attempts: u32 },
}

/// Readiness of a freshly launched server.
///
/// Transitions only move forward:
/// `Starting -> SocketReady -> QueryReady`, with `Failed` reachable from
/// either non-terminal state and `TimedOut` only from `Starting`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Starting,
    SocketReady,
    QueryReady,
    Failed(FailureReason),
    TimedOut,
}

impl ReadinessState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReadinessState::QueryReady | ReadinessState::Failed(_) | ReadinessState::TimedOut
        )
    }

    fn rank(&self) -> u8 {
        match self {
            ReadinessState::Starting => 0,
            ReadinessState::SocketReady => 1,
            ReadinessState::QueryReady
            | ReadinessState::Failed(_)
            | ReadinessState::TimedOut => 2,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: &ReadinessState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            ReadinessState::TimedOut => *self == ReadinessState::Starting,
            ReadinessState::QueryReady => *self == ReadinessState::SocketReady,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::Starting => write!(f, "starting"),
            ReadinessState::SocketReady => write!(f, "socket ready"),
            ReadinessState::QueryReady => write!(f, "query ready"),
            ReadinessState::Failed(FailureReason::ProcessExited { exit_code: Some(c) }) => {
                write!(f, "failed (process exited with code {})", c)
            }
            ReadinessState::Failed(FailureReason::ProcessExited { exit_code: None }) => {
                write!(f, "failed (process exited)")
            }
            ReadinessState::Failed(FailureReason::ConnectionRefused { attempts }) => {
                write!(f, "failed (connection refused after {} attempts)", attempts)
            }
            ReadinessState::TimedOut => write!(f, "timed out"),
        }
    }
}
