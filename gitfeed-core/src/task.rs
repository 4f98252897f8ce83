//! Background sync tasks.
//!
//! A task is a tagged description of one unit of blocking work (bulk
//! walk, single lookup, or diff retrieval) consumed by a single
//! executor. The executor runs on a dedicated blocking worker; its
//! outcome — data or failure — is a plain value moved back to the
//! awaiting caller, never shared while the worker may still be writing.

use std::path::PathBuf;

use crate::commit::{Commit, CommitId};
use crate::error::EngineError;
use crate::{process, walker};

/// Description of one unit of background work.
#[derive(Debug, Clone)]
pub enum TaskSpec {
    /// Walk the full history reachable from `head`.
    WalkAll { repo: PathBuf, head: CommitId },
    /// Resolve a single commit without its diff.
    LookupOne { repo: PathBuf, id: CommitId },
    /// Produce the textual diff for a single commit.
    DiffOne { repo: PathBuf, id: CommitId },
}

/// Data produced by a completed task.
#[derive(Debug)]
pub enum TaskOutput {
    Commits(Vec<Commit>),
    One(Commit),
    Diff(Vec<u8>),
}

impl TaskOutput {
    pub fn into_commits(self) -> Result<Vec<Commit>, EngineError> {
        match self {
            TaskOutput::Commits(commits) => Ok(commits),
            other => Err(mismatch(&other)),
        }
    }

    pub fn into_one(self) -> Result<Commit, EngineError> {
        match self {
            TaskOutput::One(commit) => Ok(commit),
            other => Err(mismatch(&other)),
        }
    }

    pub fn into_diff(self) -> Result<Vec<u8>, EngineError> {
        match self {
            TaskOutput::Diff(diff) => Ok(diff),
            other => Err(mismatch(&other)),
        }
    }
}

fn mismatch(output: &TaskOutput) -> EngineError {
    EngineError::Worker(format!("task produced mismatched output: {output:?}"))
}

/// Executes one task synchronously. Every failure is captured in the
/// returned value; nothing escapes the worker as a panic.
pub fn run(spec: TaskSpec) -> Result<TaskOutput, EngineError> {
    match spec {
        TaskSpec::WalkAll { repo, head } => Ok(TaskOutput::Commits(walker::walk(&repo, &head)?)),
        TaskSpec::LookupOne { repo, id } => Ok(TaskOutput::One(walker::lookup(&repo, &id)?)),
        TaskSpec::DiffOne { repo, id } => Ok(TaskOutput::Diff(process::show_diff(&repo, &id)?)),
    }
}

/// Runs the task on a blocking worker and awaits its outcome.
pub async fn spawn(spec: TaskSpec) -> Result<TaskOutput, EngineError> {
    tokio::task::spawn_blocking(move || run(spec))
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))?
}
