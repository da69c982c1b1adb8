//! Readiness probing of a launched server.

mod prober;
mod state;

pub use prober::{ProbeReport, ProbeSettings, ReadinessProber};
pub use state::{FailureReason, ReadinessState};
