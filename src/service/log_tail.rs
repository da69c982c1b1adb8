//! Reading the tail of server log files for diagnostics.

use fs2::FileExt;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

/// Number of lines attached to stage failure diagnostics.
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Read the last `lines` lines of a file. A missing file yields no lines.
pub fn read_tail(path: &Path, lines: usize) -> std::io::Result<Vec<String>> {
    if lines == 0 {
        return Ok(Vec::new());
    }
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    // The server may be appending; read anyway if the lock is unavailable.
    if FileExt::try_lock_shared(&file).is_err() {
        tracing::debug!("Could not acquire shared lock on {}, reading without lock", path.display());
    }

    let file_size = file.metadata()?.len();
    // Start from ~200 bytes per line and widen until enough lines fit.
    let mut window = (lines as u64).saturating_mul(200).max(4096);
    loop {
        let start_pos = file_size.saturating_sub(window);
        let mut collected = read_lines_from(&file, start_pos)?;
        if collected.len() >= lines || start_pos == 0 {
            let skip = collected.len().saturating_sub(lines);
            return Ok(collected.split_off(skip));
        }
        window = window.saturating_mul(2);
    }
}

/// Complete lines from `start_pos` to the end; a partial first line is dropped.
fn read_lines_from(file: &File, start_pos: u64) -> std::io::Result<Vec<String>> {
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(start_pos))?;
    if start_pos > 0 {
        let mut partial = Vec::new();
        reader.read_until(b'\n', &mut partial)?;
    }

    let mut collected = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        collected.push(line.trim_end_matches(['\n', '\r']).to_string());
    }
    Ok(collected)
}

/// Render labelled log tails; sections with no content are omitted.
pub fn format_tails(sections: &[(&str, &Path)], lines: usize) -> String {
    let mut out = Vec::new();
    for (label, path) in sections {
        match read_tail(path, lines) {
            Ok(tail) if !tail.is_empty() => {
                out.push(format!(
                    "--- {} ({}, last {} lines) ---\n{}",
                    label,
                    path.display(),
                    tail.len(),
                    tail.join("\n")
                ));
            }
            Ok(_) => {}
            Err(e) => out.push(format!("--- {} ({}) unreadable: {} ---", label, path.display(), e)),
        }
    }
    out.join("\n")
}
