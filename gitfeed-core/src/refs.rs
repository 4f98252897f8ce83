//! Reads the remote-tracking head from the repository's on-disk
//! reference store. Pure and synchronous; no libgit2 involvement.
//!
//! Only `refs/remotes/origin/master` is ever consulted — the engine
//! tracks a single hard-coded branch.

use std::fs;
use std::path::{Path, PathBuf};

use crate::commit::CommitId;

const TRACKING_REF: &str = "refs/remotes/origin/master";

/// Resolves the `.git` directory for a repository path. Accepts either
/// the worktree root or the `.git` directory itself.
pub fn git_dir(repo_path: &Path) -> PathBuf {
    if repo_path.join("HEAD").exists() {
        repo_path.to_path_buf()
    } else {
        repo_path.join(".git")
    }
}

/// Path of the loose ref file for the tracked remote branch. This is
/// the path the change watcher observes.
pub fn tracking_ref_path(repo_path: &Path) -> PathBuf {
    git_dir(repo_path).join(TRACKING_REF)
}

/// Current commit id of `origin/master`, or `None` when the ref is
/// absent or does not hold a well-formed identifier.
///
/// The loose ref file wins; when it is missing the packed-refs file is
/// scanned, since a fresh clone may carry its remote refs packed until
/// the first fetch rewrites them loose.
pub fn remote_head(repo_path: &Path) -> Option<CommitId> {
    let loose = tracking_ref_path(repo_path);
    if let Ok(content) = fs::read_to_string(&loose) {
        return CommitId::new(content.lines().next()?.trim());
    }
    packed_head(&git_dir(repo_path).join("packed-refs"))
}

fn packed_head(packed_refs: &Path) -> Option<CommitId> {
    let content = fs::read_to_string(packed_refs).ok()?;
    for line in content.lines() {
        // Peel lines start with '^', comments with '#'.
        if line.starts_with('^') || line.starts_with('#') {
            continue;
        }
        if let Some((id, name)) = line.split_once(' ') {
            if name.trim() == TRACKING_REF {
                return CommitId::new(id);
            }
        }
    }
    None
}
