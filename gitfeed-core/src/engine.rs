//! The sync orchestrator.
//!
//! Owns the configuration, the flag store, the watcher state, and the
//! two request lanes: bulk resync (fetch → read head → walk → filter)
//! and single-record fetch (lookup → diff). Each lane admits at most
//! one task at a time; a request against a busy lane is rejected, never
//! queued. Blocking work always runs on a dedicated worker; the
//! orchestrator only sequences outcomes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::commit::{Commit, CommitId};
use crate::config::EngineConfig;
use crate::error::{EngineError, ProtocolError, RepositoryError};
use crate::flags::FlagStore;
use crate::task::{self, TaskSpec};
use crate::watcher::{ChangeWatcher, WatchState};
use crate::{process, refs};

/// Coarse engine state reported to the host at the start and end of
/// every lane activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Running,
}

/// Notifications delivered to the host on the engine's event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StatusChanged(EngineStatus),
    /// The watcher saw the remote-tracking ref advance out of band.
    /// The host decides when to act on it (typically by calling
    /// [`SyncEngine::resync`]).
    ResyncRequested,
    ResyncCompleted(Vec<Commit>),
    ResyncFailed {
        detail: String,
    },
    RecordFetched(Commit),
    RecordFetchFailed {
        id: String,
        detail: String,
    },
}

/// Releases a lane on drop so a failed task can never leave the engine
/// stuck in a busy state.
struct LaneGuard<'a> {
    busy: &'a AtomicBool,
}

impl<'a> LaneGuard<'a> {
    fn claim(busy: &'a AtomicBool, what: &'static str) -> Result<Self, ProtocolError> {
        if busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ProtocolError::TaskAlreadyRunning(what));
        }
        Ok(Self { busy })
    }
}

impl Drop for LaneGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

pub struct SyncEngine {
    config: Mutex<EngineConfig>,
    flags: FlagStore,
    watch_state: Arc<WatchState>,
    watcher: Mutex<Option<ChangeWatcher>>,
    bulk_busy: AtomicBool,
    single_busy: AtomicBool,
    events: UnboundedSender<EngineEvent>,
}

impl SyncEngine {
    /// Creates an engine with a flag store at `flags_db` and arms the
    /// ref watcher for the configured repository (when one is set).
    pub fn new(
        config: EngineConfig,
        flags_db: &std::path::Path,
    ) -> anyhow::Result<(Self, UnboundedReceiver<EngineEvent>)> {
        Ok(Self::with_store(config, FlagStore::open(flags_db)?))
    }

    /// Creates an engine around an already-open flag store.
    pub fn with_store(
        config: EngineConfig,
        flags: FlagStore,
    ) -> (Self, UnboundedReceiver<EngineEvent>) {
        let (events, rx) = unbounded_channel();
        let engine = Self {
            config: Mutex::new(config),
            flags,
            watch_state: Arc::new(WatchState::default()),
            watcher: Mutex::new(None),
            bulk_busy: AtomicBool::new(false),
            single_busy: AtomicBool::new(false),
            events,
        };
        engine.rearm_watcher();
        (engine, rx)
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> EngineConfig {
        self.config.lock().unwrap().clone()
    }

    /// Head as of the last successful walk or watcher observation.
    pub fn last_known_head(&self) -> Option<CommitId> {
        self.watch_state.last_head()
    }

    // ── Bulk lane ──────────────────────────────────────────────

    /// Full resync: optional remote fetch, head read, history walk,
    /// configured filtering, flag attachment. Returns the ordered
    /// record list, oldest first.
    pub async fn resync(&self) -> Result<Vec<Commit>, EngineError> {
        let _lane = LaneGuard::claim(&self.bulk_busy, "bulk sync")?;
        self.emit(EngineEvent::StatusChanged(EngineStatus::Running));

        let result = self.resync_inner().await;
        match &result {
            Ok(commits) => {
                info!(records = commits.len(), "resync completed");
                self.emit(EngineEvent::ResyncCompleted(commits.clone()));
            }
            Err(e) => {
                warn!(error = %e, "resync failed");
                self.emit(EngineEvent::ResyncFailed {
                    detail: e.to_string(),
                });
            }
        }
        self.emit(EngineEvent::StatusChanged(EngineStatus::Idle));
        result
    }

    async fn resync_inner(&self) -> Result<Vec<Commit>, EngineError> {
        let config = self.config();
        let repo = config.repository_path.clone();

        if config.fetch_enabled {
            // The watcher must not react to the ref change our own
            // fetch is about to cause.
            self.watch_state.suppressed.store(true, Ordering::SeqCst);
            let fetch_repo = repo.clone();
            let joined =
                tokio::task::spawn_blocking(move || process::fetch_origin(&fetch_repo)).await;
            self.watch_state.suppressed.store(false, Ordering::SeqCst);

            let fetched = joined.map_err(|e| EngineError::Worker(e.to_string()))?;
            if let Err(e) = fetched {
                if config.tolerate_fetch_failure {
                    warn!(error = %e, "remote fetch failed, walking stale local history");
                } else {
                    return Err(e.into());
                }
            }
        }

        let head = refs::remote_head(&repo).ok_or_else(|| {
            RepositoryError::InvalidHead(
                "remote-tracking ref refs/remotes/origin/master is missing or malformed".into(),
            )
        })?;

        let commits = task::spawn(TaskSpec::WalkAll {
            repo,
            head: head.clone(),
        })
        .await?
        .into_commits()?;

        let mut commits = apply_filters(&config, commits);
        for commit in &mut commits {
            commit.flags = self.flags.flags_for(commit.id.as_str())?;
        }

        self.watch_state.set_last_head(Some(head));
        Ok(commits)
    }

    // ── Single-record lane ─────────────────────────────────────

    /// Fetches one commit with its textual diff and persisted flags.
    pub async fn fetch_record(&self, raw_id: &str) -> Result<Commit, EngineError> {
        let _lane = LaneGuard::claim(&self.single_busy, "record fetch")?;
        self.emit(EngineEvent::StatusChanged(EngineStatus::Running));

        let result = self.fetch_record_inner(raw_id).await;
        match &result {
            Ok(commit) => {
                debug!(commit = %commit.id.short(), "record fetched");
                self.emit(EngineEvent::RecordFetched(commit.clone()));
            }
            Err(e) => {
                warn!(id = raw_id, error = %e, "record fetch failed");
                self.emit(EngineEvent::RecordFetchFailed {
                    id: raw_id.to_string(),
                    detail: e.to_string(),
                });
            }
        }
        self.emit(EngineEvent::StatusChanged(EngineStatus::Idle));
        result
    }

    async fn fetch_record_inner(&self, raw_id: &str) -> Result<Commit, EngineError> {
        let trimmed = raw_id.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::NothingToFetch.into());
        }
        let id = CommitId::new(trimmed)
            .ok_or_else(|| RepositoryError::InvalidHead(trimmed.to_string()))?;
        let repo = self.config().repository_path;

        // Lookup first; the diff is never attempted for an unknown id.
        let mut commit = task::spawn(TaskSpec::LookupOne {
            repo: repo.clone(),
            id: id.clone(),
        })
        .await?
        .into_one()?;

        let diff = task::spawn(TaskSpec::DiffOne { repo, id }).await?.into_diff()?;
        commit.diff = Some(diff);
        commit.flags = self.flags.flags_for(commit.id.as_str())?;
        Ok(commit)
    }

    // ── Reconfiguration ────────────────────────────────────────

    /// Points the engine at a different repository. Flags refer to
    /// commits of the old repository and are wiped; the watcher is
    /// re-armed and the remembered head forgotten so the next resync
    /// treats the repository as fresh.
    pub fn set_repository_path(&self, path: PathBuf) -> Result<(), EngineError> {
        {
            let mut config = self.config.lock().unwrap();
            if config.repository_path == path {
                return Ok(());
            }
            info!(
                old = %config.repository_path.display(),
                new = %path.display(),
                "repository path changed"
            );
            config.repository_path = path;
        }
        self.flags.clear()?;
        self.watch_state.set_last_head(None);
        self.rearm_watcher();
        Ok(())
    }

    fn rearm_watcher(&self) {
        let mut slot = self.watcher.lock().unwrap();
        // Drop any previous watch before installing the new one.
        *slot = None;

        let path = self.config.lock().unwrap().repository_path.clone();
        if path.as_os_str().is_empty() {
            return;
        }
        if !refs::git_dir(&path).exists() {
            warn!(repo = %path.display(), "no repository at path, ref watcher disarmed");
            return;
        }
        match ChangeWatcher::arm(&path, self.watch_state.clone(), self.events.clone()) {
            Ok(watcher) => *slot = Some(watcher),
            Err(e) => warn!(error = %e, "failed to arm ref watcher"),
        }
    }

    // ── Flag mutations (forwarded from the record sink) ────────

    pub fn add_flag(&self, id: &CommitId, flag: &str) -> Result<(), EngineError> {
        self.flags.insert(id.as_str(), flag)?;
        Ok(())
    }

    pub fn remove_flag(&self, id: &CommitId, flag: &str) -> Result<(), EngineError> {
        self.flags.remove(id.as_str(), flag)?;
        Ok(())
    }

    pub fn clear_flags_for(&self, id: &CommitId) -> Result<(), EngineError> {
        self.flags.remove_all(id.as_str())?;
        Ok(())
    }

    pub fn flags_for(&self, id: &CommitId) -> Result<Vec<String>, EngineError> {
        Ok(self.flags.flags_for(id.as_str())?)
    }

    pub fn clear_all_flags(&self) -> Result<(), EngineError> {
        self.flags.clear()?;
        Ok(())
    }

    fn emit(&self, event: EngineEvent) {
        // A host that dropped its receiver simply stops observing.
        let _ = self.events.send(event);
    }
}

/// Applies the configured history floor and automated-author exclusion.
fn apply_filters(config: &EngineConfig, commits: Vec<Commit>) -> Vec<Commit> {
    commits
        .into_iter()
        .filter(|c| config.history_floor.is_none_or(|floor| c.time >= floor))
        .filter(|c| !(config.exclude_automated_author && c.author == config.automated_author))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::process::Command;
    use tempfile::TempDir;

    fn git_env(dir: &Path, args: &[&str], extra_env: &[(&str, &str)]) {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "Tester")
            .env("GIT_AUTHOR_EMAIL", "tester@example.org")
            .env("GIT_COMMITTER_NAME", "Tester")
            .env("GIT_COMMITTER_EMAIL", "tester@example.org");
        for (k, v) in extra_env {
            cmd.env(k, v);
        }
        let status = cmd.status().unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn git(dir: &Path, args: &[&str]) {
        git_env(dir, args, &[]);
    }

    fn commit_dated(repo: &Path, file: &str, message: &str, email: &str, date: &str) {
        std::fs::write(repo.join(file), format!("{message}\n")).unwrap();
        git(repo, &["add", file]);
        git_env(
            repo,
            &["commit", "-q", "-m", message],
            &[
                ("GIT_AUTHOR_EMAIL", email),
                ("GIT_AUTHOR_DATE", date),
                ("GIT_COMMITTER_DATE", date),
            ],
        );
    }

    /// Origin with three commits (one by the automated author) plus a
    /// working clone whose `origin/master` tracks it.
    fn fixture(tmp: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
        let origin = tmp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        git(&origin, &["init", "-q", "-b", "master"]);
        commit_dated(
            &origin,
            "a.txt",
            "first",
            "alice@example.org",
            "2026-01-01T10:00:00Z",
        );
        commit_dated(
            &origin,
            "b.txt",
            "automated update",
            "scripty@kde.org",
            "2026-01-02T10:00:00Z",
        );
        commit_dated(
            &origin,
            "c.txt",
            "third",
            "carol@example.org",
            "2026-01-03T10:00:00Z",
        );

        let work = tmp.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        git(&work, &["init", "-q", "-b", "master"]);
        git(&work, &["remote", "add", "origin", origin.to_str().unwrap()]);
        git(&work, &["fetch", "-q", "origin"]);
        (origin, work)
    }

    fn engine_for(work: &Path, config: EngineConfig) -> (SyncEngine, UnboundedReceiver<EngineEvent>) {
        let mut config = config;
        config.repository_path = work.to_path_buf();
        SyncEngine::with_store(config, FlagStore::open_in_memory().unwrap())
    }

    fn drain(rx: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn resync_delivers_history_oldest_first() {
        let tmp = TempDir::new().unwrap();
        let (_origin, work) = fixture(&tmp);
        let (engine, mut rx) = engine_for(&work, EngineConfig::default());

        let commits = engine.resync().await.unwrap();
        assert_eq!(commits.len(), 3);
        let summaries: Vec<_> = commits.iter().map(|c| c.summary()).collect();
        assert_eq!(summaries, vec!["first", "automated update", "third"]);
        assert_eq!(engine.last_known_head(), Some(commits[2].id.clone()));

        let events = drain(&mut rx);
        assert_eq!(events[0], EngineEvent::StatusChanged(EngineStatus::Running));
        assert!(matches!(events[1], EngineEvent::ResyncCompleted(ref c) if c.len() == 3));
        assert_eq!(events[2], EngineEvent::StatusChanged(EngineStatus::Idle));
    }

    #[tokio::test]
    async fn resync_applies_floor_and_author_filters() {
        let tmp = TempDir::new().unwrap();
        let (_origin, work) = fixture(&tmp);
        let mut config = EngineConfig::default();
        config.history_floor = Some("2026-01-01T12:00:00Z".parse().unwrap());
        config.exclude_automated_author = true;
        let (engine, _rx) = engine_for(&work, config);

        let commits = engine.resync().await.unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].summary(), "third");
        assert_eq!(commits[0].author, "carol@example.org");
    }

    #[tokio::test]
    async fn resync_attaches_persisted_flags() {
        let tmp = TempDir::new().unwrap();
        let (_origin, work) = fixture(&tmp);
        let (engine, _rx) = engine_for(&work, EngineConfig::default());

        let commits = engine.resync().await.unwrap();
        let newest = commits.last().unwrap().id.clone();
        engine.add_flag(&newest, "seen").unwrap();
        engine.add_flag(&newest, "seen").unwrap();

        let commits = engine.resync().await.unwrap();
        assert_eq!(commits.last().unwrap().flags, vec!["seen"]);
        assert!(commits[0].flags.is_empty());
    }

    #[tokio::test]
    async fn resync_without_fetch_never_touches_the_remote() {
        let tmp = TempDir::new().unwrap();
        let (_origin, work) = fixture(&tmp);
        // With no remote configured a fetch attempt would fail loudly.
        git(&work, &["remote", "remove", "origin"]);
        let mut config = EngineConfig::default();
        config.fetch_enabled = false;
        let (engine, _rx) = engine_for(&work, config);

        let commits = engine.resync().await.unwrap();
        assert_eq!(commits.len(), 3);
    }

    #[tokio::test]
    async fn resync_tolerates_fetch_failure_on_stale_history() {
        let tmp = TempDir::new().unwrap();
        let (_origin, work) = fixture(&tmp);
        git(&work, &["remote", "set-url", "origin", "/nonexistent/repo"]);
        let (engine, _rx) = engine_for(&work, EngineConfig::default());

        let commits = engine.resync().await.unwrap();
        assert_eq!(commits.len(), 3, "stale local history should be served");
    }

    #[tokio::test]
    async fn resync_surfaces_fetch_failure_when_not_tolerated() {
        let tmp = TempDir::new().unwrap();
        let (_origin, work) = fixture(&tmp);
        git(&work, &["remote", "set-url", "origin", "/nonexistent/repo"]);
        let mut config = EngineConfig::default();
        config.tolerate_fetch_failure = false;
        let (engine, _rx) = engine_for(&work, config);

        let err = engine.resync().await.unwrap_err();
        assert!(matches!(err, EngineError::Process(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn busy_bulk_lane_rejects_and_recovers() {
        let tmp = TempDir::new().unwrap();
        let (_origin, work) = fixture(&tmp);
        let (engine, _rx) = engine_for(&work, EngineConfig::default());

        engine.bulk_busy.store(true, Ordering::SeqCst);
        let err = engine.resync().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolError::TaskAlreadyRunning(_))
        ));

        engine.bulk_busy.store(false, Ordering::SeqCst);
        assert_eq!(engine.resync().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn busy_single_lane_does_not_block_bulk_lane() {
        let tmp = TempDir::new().unwrap();
        let (_origin, work) = fixture(&tmp);
        let (engine, _rx) = engine_for(&work, EngineConfig::default());

        engine.single_busy.store(true, Ordering::SeqCst);
        assert_eq!(engine.resync().await.unwrap().len(), 3);
        let err = engine.fetch_record(&"a".repeat(40)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolError::TaskAlreadyRunning(_))
        ));
    }

    #[tokio::test]
    async fn fetch_record_returns_commit_with_diff() {
        let tmp = TempDir::new().unwrap();
        let (_origin, work) = fixture(&tmp);
        let (engine, mut rx) = engine_for(&work, EngineConfig::default());

        let commits = engine.resync().await.unwrap();
        let newest = commits.last().unwrap().id.clone();
        drain(&mut rx);

        let record = engine.fetch_record(newest.as_str()).await.unwrap();
        assert_eq!(record.id, newest);
        let diff = String::from_utf8_lossy(record.diff.as_deref().unwrap());
        assert!(diff.contains("diff --git"));
        assert!(diff.contains("+third"));

        let events = drain(&mut rx);
        assert_eq!(events[0], EngineEvent::StatusChanged(EngineStatus::Running));
        assert!(matches!(events[1], EngineEvent::RecordFetched(_)));
        assert_eq!(events[2], EngineEvent::StatusChanged(EngineStatus::Idle));
    }

    #[tokio::test]
    async fn fetch_record_empty_id_is_nothing_to_fetch() {
        let tmp = TempDir::new().unwrap();
        let (_origin, work) = fixture(&tmp);
        let (engine, _rx) = engine_for(&work, EngineConfig::default());

        for raw in ["", "   "] {
            let err = engine.fetch_record(raw).await.unwrap_err();
            assert!(matches!(
                err,
                EngineError::Protocol(ProtocolError::NothingToFetch)
            ));
        }
    }

    #[tokio::test]
    async fn fetch_record_unknown_id_fails_before_diffing() {
        let tmp = TempDir::new().unwrap();
        let (_origin, work) = fixture(&tmp);
        let (engine, _rx) = engine_for(&work, EngineConfig::default());

        let err = engine.fetch_record(&"d".repeat(40)).await.unwrap_err();
        // The failure comes from the lookup, not from the diff process.
        assert!(matches!(err, EngineError::Repository(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn changing_repository_path_wipes_flags_and_head() {
        let tmp = TempDir::new().unwrap();
        let (_origin, work) = fixture(&tmp);
        let (engine, _rx) = engine_for(&work, EngineConfig::default());

        let commits = engine.resync().await.unwrap();
        let newest = commits.last().unwrap().id.clone();
        engine.add_flag(&newest, "seen").unwrap();
        assert!(engine.last_known_head().is_some());

        let other = tmp.path().join("elsewhere");
        engine.set_repository_path(other.clone()).unwrap();
        assert!(engine.flags_for(&newest).unwrap().is_empty());
        assert!(engine.last_known_head().is_none());
        assert_eq!(engine.config().repository_path, other);

        // Re-pointing at the same path is a no-op.
        engine.add_flag(&newest, "seen").unwrap();
        engine.set_repository_path(other).unwrap();
        assert_eq!(engine.flags_for(&newest).unwrap(), vec!["seen"]);
    }

    #[tokio::test]
    async fn failed_resync_reports_and_returns_to_idle() {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.repository_path = tmp.path().join("missing");
        config.fetch_enabled = false;
        let (engine, mut rx) =
            SyncEngine::with_store(config, FlagStore::open_in_memory().unwrap());

        let err = engine.resync().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Repository(RepositoryError::InvalidHead(_))
        ));

        let events = drain(&mut rx);
        assert_eq!(events[0], EngineEvent::StatusChanged(EngineStatus::Running));
        assert!(matches!(events[1], EngineEvent::ResyncFailed { .. }));
        assert_eq!(events[2], EngineEvent::StatusChanged(EngineStatus::Idle));

        // The lane must be reusable: same failure again, not a
        // busy-lane rejection.
        let err = engine.resync().await.unwrap_err();
        assert!(matches!(err, EngineError::Repository(_)));
    }

    #[test]
    fn filters_are_inclusive_at_the_floor() {
        let floor: chrono::DateTime<chrono::Utc> = "2026-01-02T10:00:00Z".parse().unwrap();
        let mk = |summary: &str, email: &str, time: &str| Commit {
            id: CommitId::new("e".repeat(40)).unwrap(),
            author: email.into(),
            message: summary.as_bytes().to_vec(),
            time: time.parse().unwrap(),
            diff: None,
            flags: Vec::new(),
        };
        let commits = vec![
            mk("too old", "a@example.org", "2026-01-01T09:00:00Z"),
            mk("at the floor", "b@example.org", "2026-01-02T10:00:00Z"),
            mk("automated", "scripty@kde.org", "2026-01-03T10:00:00Z"),
        ];

        let mut config = EngineConfig::default();
        config.history_floor = Some(floor);
        config.exclude_automated_author = true;
        let kept = apply_filters(&config, commits);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].summary(), "at the floor");
    }
}
