//! Controller configuration.
//!
//! - `types` - the `Config` struct and its sections
//! - `duration` - human-readable duration fields
//! - `parser` - locating and loading `bringup.yaml`

mod duration;
mod parser;
mod types;

pub use duration::*;
pub use parser::*;
pub use types::*;

use std::path::{Path, PathBuf};

/// Expand a leading `~` or `~/` to the user's home directory.
/// Returns the path unchanged if it doesn't start with `~` or if the home
/// directory can't be determined.
pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s == "~" {
        dirs::home_dir().unwrap_or_else(|| path.to_path_buf())
    } else if let Some(rest) = s.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    }
}
