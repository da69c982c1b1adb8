//! Server process lifecycle: launch, liveness, termination and log tails.

mod launcher;
pub mod log_tail;
mod process;
pub mod stale;

pub use launcher::Launcher;
pub use process::{pid_is_alive, ServerProcess};
