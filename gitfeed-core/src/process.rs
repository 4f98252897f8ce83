//! External `git` invocations: remote fetch and per-commit diff.
//!
//! Both operations are a single attempt with no retry and no timeout;
//! the process blocks until `git` exits. Output is captured, never
//! inherited.

use std::path::Path;
use std::process::{Command, Output};

use tracing::debug;

use crate::commit::CommitId;
use crate::error::ProcessError;

/// Runs `git fetch origin` with the repository as working directory.
pub fn fetch_origin(repo_path: &Path) -> Result<(), ProcessError> {
    debug!(repo = %repo_path.display(), "running git fetch origin");
    let output = Command::new("git")
        .args(["fetch", "origin"])
        .current_dir(repo_path)
        .output()
        .map_err(|e| ProcessError::Pulling {
            code: -1,
            detail: format!("failed to spawn git fetch: {e}"),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(ProcessError::Pulling {
            code: output.status.code().unwrap_or(-1),
            detail: error_text(&output),
        })
    }
}

/// Runs `git show <id>` and captures stdout as the raw diff body.
pub fn show_diff(repo_path: &Path, id: &CommitId) -> Result<Vec<u8>, ProcessError> {
    debug!(repo = %repo_path.display(), commit = %id.short(), "running git show");
    let output = Command::new("git")
        .args(["show", id.as_str()])
        .current_dir(repo_path)
        .output()
        .map_err(|e| ProcessError::Diffing {
            code: -1,
            detail: format!("failed to spawn git show: {e}"),
        })?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(ProcessError::Diffing {
            code: output.status.code().unwrap_or(-1),
            detail: error_text(&output),
        })
    }
}

fn error_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = if !stderr.trim().is_empty() {
        stderr
    } else {
        stdout
    };
    text.trim().to_string()
}
