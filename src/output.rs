use std::io::Write;

/// Where operator-facing lines go. `tracing` carries the diagnostics.
pub trait UserOutput: Send + Sync {
    fn status(&self, message: &str);

    fn success(&self, message: &str);

    fn warning(&self, message: &str);

    fn error(&self, message: &str);

    /// Opens a stage line; `finish_progress` closes it.
    fn progress(&self, message: &str);

    fn finish_progress(&self, result: &str);

    fn blank(&self);

    /// Start of a pipeline stage, e.g. "[3/6] Rendering server config... ".
    fn stage(&self, step: usize, total: usize, name: &str) {
        self.progress(&format!("[{}/{}] {}... ", step, total, name));
    }
}

const GREEN: &str = "32";
const YELLOW: &str = "33";
const RED: &str = "31";

fn paint(color: &str, message: &str) -> String {
    format!("\x1b[{}m{}\x1b[0m", color, message)
}

/// Colored terminal output. Warnings and errors go to stderr.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("{}", paint(GREEN, message));
    }

    fn warning(&self, message: &str) {
        eprintln!("{}", paint(YELLOW, message));
    }

    fn error(&self, message: &str) {
        eprintln!("{}", paint(RED, message));
    }

    fn progress(&self, message: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "{}", message).and_then(|_| stdout.flush());
    }

    fn finish_progress(&self, result: &str) {
        self.status(result);
    }

    fn blank(&self) {
        self.status("");
    }
}

/// Used by `--quiet`, `status --json` and tests.
pub struct QuietOutput;

impl UserOutput for QuietOutput {
    fn status(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
    fn progress(&self, _message: &str) {}
    fn finish_progress(&self, _result: &str) {}
    fn blank(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paint_wraps_in_reset() {
        assert_eq!(paint(RED, "boom"), "\x1b[31mboom\x1b[0m");
    }
}
