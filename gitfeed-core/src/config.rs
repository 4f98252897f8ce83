//! Engine configuration, persisted as JSON.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration consumed by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worktree root or `.git` directory of the tracked repository.
    pub repository_path: PathBuf,

    /// Run `git fetch origin` before walking history.
    pub fetch_enabled: bool,

    /// When the fetch fails, keep going and walk whatever local history
    /// is already present instead of failing the whole sync.
    #[serde(default = "default_true")]
    pub tolerate_fetch_failure: bool,

    /// Commits older than this are dropped from bulk results. The floor
    /// itself is inclusive.
    pub history_floor: Option<DateTime<Utc>>,

    /// Drop commits authored by `automated_author` from bulk results.
    pub exclude_automated_author: bool,

    /// Contact address of the automated committer to exclude.
    #[serde(default = "default_automated_author")]
    pub automated_author: String,

    /// Contact address records are addressed to by the owning
    /// application. Not interpreted by the engine.
    pub user_identity: String,
}

fn default_true() -> bool {
    true
}

fn default_automated_author() -> String {
    "scripty@kde.org".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            repository_path: PathBuf::new(),
            fetch_enabled: true,
            tolerate_fetch_failure: true,
            history_floor: None,
            exclude_automated_author: false,
            automated_author: default_automated_author(),
            user_identity: String::new(),
        }
    }
}

impl EngineConfig {
    /// Loads the config from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {path:?}"))?;
        let config: EngineConfig =
            serde_json::from_str(&data).with_context(|| "failed to parse config JSON")?;
        Ok(config)
    }

    /// Saves the config to `path` atomically (write aside, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
