//! Bounded shellouts to local CLIs.
//!
//! - Probing (`which`/`has`) never spawns a process.
//! - Runs carry a timeout; the child is killed when the run future is dropped.
//! - No env dumps; callers decide what of stderr to surface.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Resolve `bin` on `PATH`, or check it directly when it already names a path.
pub fn which(bin: &str) -> Option<PathBuf> {
    let bin = bin.trim();
    if bin.is_empty() {
        return None;
    }
    if bin.contains(std::path::MAIN_SEPARATOR) || bin.contains('/') {
        let p = Path::new(bin);
        return p.is_file().then(|| p.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let cand = dir.join(bin);
        if cand.is_file() {
            return Some(cand);
        }
        if cfg!(windows) {
            let cand = dir.join(format!("{bin}.exe"));
            if cand.is_file() {
                return Some(cand);
            }
        }
    }
    None
}

pub fn has(bin: &str) -> bool {
    which(bin).is_some()
}

#[derive(Debug, Clone)]
pub struct Captured {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    /// Tail of stderr, lossily decoded.
    pub stderr: String,
}

const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Run `cmd` to completion and capture its output.
///
/// Errors are short stable codes: `shellout_tool_not_found`, `shellout_spawn_failed`,
/// `shellout_timeout`, `shellout_wait_failed`, `shellout_output_too_large`.
pub async fn run_captured(
    mut cmd: Command,
    timeout: Duration,
    max_stdout_bytes: usize,
) -> Result<Captured, &'static str> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            "shellout_tool_not_found"
        } else {
            "shellout_spawn_failed"
        }
    })?;

    // On timeout the future (and the child it owns) is dropped, which kills the child.
    let out = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(r) => r.map_err(|_| "shellout_wait_failed")?,
        Err(_) => return Err("shellout_timeout"),
    };

    if out.stdout.len() > max_stdout_bytes {
        return Err("shellout_output_too_large");
    }

    let tail_start = out.stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    Ok(Captured {
        success: out.status.success(),
        exit_code: out.status.code(),
        stdout: out.stdout,
        stderr: String::from_utf8_lossy(&out.stderr[tail_start..]).into_owned(),
    })
}
