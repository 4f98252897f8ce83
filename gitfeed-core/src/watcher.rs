//! Watches the remote-tracking ref for out-of-band advancement.
//!
//! A third party (another tool, a cron job) may fetch into the same
//! repository; when the ref file changes, the watcher reads the new
//! head and asks the orchestrator for a resync. During the engine's own
//! fetch the watcher is suppressed so it does not react to a change the
//! engine itself caused.
//!
//! The watch is installed on the directory holding the ref, not the
//! file: git replaces loose refs by rename, which would orphan a
//! file-level watch.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, warn};

use crate::commit::CommitId;
use crate::engine::EngineEvent;
use crate::refs;

const DEBOUNCE: Duration = Duration::from_millis(250);

/// State shared between the watcher and the orchestrator.
#[derive(Debug, Default)]
pub struct WatchState {
    /// Head as of the last successful walk or watcher observation.
    pub last_head: Mutex<Option<CommitId>>,
    /// True exactly while a self-initiated fetch is outstanding.
    pub suppressed: AtomicBool,
}

impl WatchState {
    pub fn last_head(&self) -> Option<CommitId> {
        self.last_head.lock().unwrap().clone()
    }

    pub fn set_last_head(&self, head: Option<CommitId>) {
        *self.last_head.lock().unwrap() = head;
    }
}

/// An armed watch on one repository's remote-tracking ref. Dropping it
/// disarms the watch.
pub struct ChangeWatcher {
    // Keep-alive handle; events stop when this drops.
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

impl ChangeWatcher {
    /// Installs a debounced watch for `repo_path`'s tracking ref.
    /// Resync requests are delivered on `tx`.
    pub fn arm(
        repo_path: &Path,
        state: Arc<WatchState>,
        tx: UnboundedSender<EngineEvent>,
    ) -> Result<Self> {
        let ref_path = refs::tracking_ref_path(repo_path);
        let watch_dir = ref_path
            .parent()
            .context("tracking ref has no parent directory")?
            .to_path_buf();
        // The directory may not exist before the first fetch; an empty
        // ref directory is harmless to git.
        fs::create_dir_all(&watch_dir)
            .with_context(|| format!("failed to create {watch_dir:?}"))?;

        let repo_path = repo_path.to_path_buf();
        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    if events.iter().any(|e| e.path == ref_path) {
                        on_ref_event(&repo_path, &state, &tx);
                    }
                }
                Err(e) => error!(error = %e, "ref watch error"),
            },
        )
        .context("failed to create ref watcher")?;

        debouncer
            .watcher()
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {watch_dir:?}"))?;

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

fn on_ref_event(repo_path: &Path, state: &WatchState, tx: &UnboundedSender<EngineEvent>) {
    let head = refs::remote_head(repo_path);
    if decide_resync(state, head) {
        debug!("remote-tracking ref advanced, requesting resync");
        if tx.send(EngineEvent::ResyncRequested).is_err() {
            warn!("resync request receiver dropped");
        }
    }
}

/// Decides whether a ref change warrants a resync request, updating the
/// shared head immediately so duplicate filesystem events for one
/// logical change produce a single request.
fn decide_resync(state: &WatchState, new_head: Option<CommitId>) -> bool {
    if state.suppressed.load(Ordering::SeqCst) {
        debug!("ref change ignored during self-initiated fetch");
        return false;
    }
    let Some(new_head) = new_head else {
        return false;
    };
    let mut last = state.last_head.lock().unwrap();
    if last.as_ref() == Some(&new_head) {
        return false;
    }
    *last = Some(new_head);
    true
}
