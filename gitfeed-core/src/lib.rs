//! Gitfeed Core Library
//!
//! Exposes a git repository's commit history as a synchronized feed of
//! addressable records, including:
//! - Commit graph walking through libgit2 (reverse topological order)
//! - On-demand diff retrieval and remote fetch via external `git`
//! - Remote-tracking ref reading and change watching
//! - Durable per-commit flags in SQLite
//! - The sync orchestrator sequencing it all into two request lanes

pub mod commit;
pub mod config;
pub mod engine;
pub mod error;
pub mod flags;
pub mod process;
pub mod refs;
pub mod task;
pub mod walker;
pub mod watcher;

pub use commit::{Commit, CommitId};
pub use config::EngineConfig;
pub use engine::{EngineEvent, EngineStatus, SyncEngine};
pub use error::{EngineError, ProcessError, ProtocolError, RepositoryError};
pub use flags::FlagStore;
pub use watcher::{ChangeWatcher, WatchState};
