//! Error types for the sync engine.
//!
//! Three independent taxonomies, matching the three kinds of things that
//! can go wrong: repository access through libgit2, external `git`
//! process invocations, and request-sequencing violations. `EngineError`
//! is the umbrella the orchestrator hands back to callers.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading the repository through libgit2.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("failed to open repository at {path}: {source}")]
    OpeningRepository {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    /// The starting identifier is empty, malformed, or unknown to the
    /// repository. Also raised when the remote-tracking ref cannot be
    /// read at all.
    #[error("no usable head commit: {0}")]
    InvalidHead(String),

    #[error("failed to look up commit {id}: {source}")]
    CommitLookup {
        id: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to set up revision walk: {0}")]
    RevwalkSetup(#[source] git2::Error),
}

/// Errors from external `git` process invocations, carrying the exit
/// code for diagnostics.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("git fetch exited with code {code}: {detail}")]
    Pulling { code: i32, detail: String },

    #[error("git show exited with code {code}: {detail}")]
    Diffing { code: i32, detail: String },
}

impl ProcessError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ProcessError::Pulling { code, .. } => *code,
            ProcessError::Diffing { code, .. } => *code,
        }
    }
}

/// Request-sequencing errors. These never involve the repository at all.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A request arrived for a lane that already has a task in flight.
    /// Requests are rejected, never queued.
    #[error("a {0} task is already running")]
    TaskAlreadyRunning(&'static str),

    /// A single-record fetch was requested with an empty identifier.
    #[error("empty commit id requested")]
    NothingToFetch,
}

/// Umbrella error returned by the orchestrator's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("flag store error: {0}")]
    Flags(#[from] rusqlite::Error),

    /// The blocking worker running a task terminated abnormally
    /// (panicked or was cancelled) before publishing an outcome.
    #[error("sync worker terminated abnormally: {0}")]
    Worker(String),
}
