//! Walks the repository's commit graph through libgit2.
//!
//! The bulk walk emits commits in reverse topological order — oldest
//! ancestor first, the starting commit last — so consumers can append
//! to a growing view without re-sorting. The walk is all-or-nothing: a
//! failure mid-walk discards everything accumulated so far.

use std::path::Path;

use chrono::{DateTime, Utc};
use git2::{Oid, Repository, Sort};

use crate::commit::{Commit, CommitId};
use crate::error::RepositoryError;

impl From<Oid> for CommitId {
    fn from(oid: Oid) -> Self {
        // An Oid always formats as 40 lowercase hex characters.
        CommitId::from_hex_unchecked(oid.to_string())
    }
}

/// Walks ancestors of `start`, returning the full ordered history.
pub fn walk(repo_path: &Path, start: &CommitId) -> Result<Vec<Commit>, RepositoryError> {
    let repo = open(repo_path)?;
    let start_oid = resolve(&repo, start)?;

    let mut revwalk = repo.revwalk().map_err(RepositoryError::RevwalkSetup)?;
    revwalk
        .set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)
        .map_err(RepositoryError::RevwalkSetup)?;
    revwalk
        .push(start_oid)
        .map_err(RepositoryError::RevwalkSetup)?;

    let mut commits = Vec::new();
    for oid in revwalk {
        let oid = oid.map_err(|source| RepositoryError::CommitLookup {
            id: start.to_string(),
            source,
        })?;
        let commit = repo
            .find_commit(oid)
            .map_err(|source| RepositoryError::CommitLookup {
                id: oid.to_string(),
                source,
            })?;
        commits.push(materialize(&commit));
    }
    Ok(commits)
}

/// Resolves a single commit without walking its ancestry.
pub fn lookup(repo_path: &Path, id: &CommitId) -> Result<Commit, RepositoryError> {
    let repo = open(repo_path)?;
    let oid = resolve(&repo, id)?;
    let commit = repo
        .find_commit(oid)
        .map_err(|source| RepositoryError::CommitLookup {
            id: id.to_string(),
            source,
        })?;
    Ok(materialize(&commit))
}

fn open(repo_path: &Path) -> Result<Repository, RepositoryError> {
    Repository::open(repo_path).map_err(|source| RepositoryError::OpeningRepository {
        path: repo_path.to_path_buf(),
        source,
    })
}

fn resolve(repo: &Repository, id: &CommitId) -> Result<Oid, RepositoryError> {
    let oid = Oid::from_str(id.as_str())
        .map_err(|_| RepositoryError::InvalidHead(id.to_string()))?;
    // Distinguish "malformed" from "unknown to this repository" up
    // front so the revwalk never starts from a nonexistent object.
    if repo.find_object(oid, None).is_err() {
        return Err(RepositoryError::InvalidHead(id.to_string()));
    }
    Ok(oid)
}

fn materialize(commit: &git2::Commit<'_>) -> Commit {
    let author = commit.author();
    let time = DateTime::from_timestamp(commit.time().seconds(), 0)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    Commit {
        id: commit.id().into(),
        author: String::from_utf8_lossy(author.email_bytes()).into_owned(),
        message: commit.message_bytes().to_vec(),
        time,
        diff: None,
        flags: Vec::new(),
    }
}
