//! gitfeed — commit-history feed tool.
//!
//! Drives the sync engine from the command line:
//! - Full resync of the tracked branch into an ordered record list
//! - Single-record fetch with the commit's textual diff
//! - Flag management (add/remove/list/clear)
//! - A watch loop reacting to out-of-band repository advancement
//!
//! # Usage
//!
//! ```bash
//! # One-shot resync, one line per record
//! gitfeed --repo /path/to/checkout sync
//!
//! # Fetch one record with its diff
//! gitfeed --repo /path/to/checkout show 1234567890abcdef1234567890abcdef12345678
//!
//! # Mark a record seen
//! gitfeed --repo /path/to/checkout flag add <sha1> seen
//!
//! # Keep the feed current until interrupted
//! gitfeed --repo /path/to/checkout watch
//!
//! # Inspect / change persisted settings
//! gitfeed config show
//! gitfeed config set history-floor 2026-01-01T00:00:00Z
//! ```

use std::io::Write;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use gitfeed_core::{Commit, CommitId, EngineConfig, EngineEvent, SyncEngine};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "gitfeed")]
#[command(author = "Gitfeed Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Synchronized feed of a git repository's commit history")]
struct Cli {
    /// Repository worktree or .git directory (overrides the config file)
    #[arg(short, long, global = true)]
    repo: Option<PathBuf>,

    /// Config file
    #[arg(short, long, global = true, default_value = "gitfeed.json")]
    config: PathBuf,

    /// Flag database (default: <repo .git dir>/gitfeed-flags.db)
    #[arg(long, global = true)]
    flags_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resync the full history and print one line per record
    Sync,

    /// Fetch a single record, including its diff
    Show {
        /// Full 40-character commit id
        sha1: String,
    },

    /// Manage per-record flags
    Flag {
        #[command(subcommand)]
        action: FlagAction,
    },

    /// Resync now, then keep resyncing whenever the remote-tracking
    /// ref advances, until interrupted
    Watch,

    /// Inspect or change the persisted configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum FlagAction {
    /// Attach a flag to a record
    Add { sha1: String, flag: String },
    /// Detach a flag from a record
    Remove { sha1: String, flag: String },
    /// List a record's flags
    List { sha1: String },
    /// Drop all flags of one record
    Clear { sha1: String },
    /// Drop every flag of every record
    ClearAll,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the current configuration
    Show,
    /// Set one key (repository-path, fetch-enabled,
    /// tolerate-fetch-failure, history-floor, exclude-automated-author,
    /// automated-author, user-identity)
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gitfeed=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Sync => cmd_sync(&cli).await,
        Commands::Show { sha1 } => cmd_show(&cli, sha1).await,
        Commands::Flag { action } => cmd_flag(&cli, action),
        Commands::Watch => cmd_watch(&cli).await,
        Commands::Config { action } => cmd_config(&cli, action),
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(&cli.config)?;
    if let Some(repo) = &cli.repo {
        config.repository_path = repo.clone();
    }
    if config.repository_path.as_os_str().is_empty() {
        return Err(anyhow!(
            "no repository configured; pass --repo or run `gitfeed config set repository-path <path>`"
        ));
    }
    Ok(config)
}

fn flags_db_path(cli: &Cli, config: &EngineConfig) -> PathBuf {
    cli.flags_db.clone().unwrap_or_else(|| {
        gitfeed_core::refs::git_dir(&config.repository_path).join("gitfeed-flags.db")
    })
}

fn build_engine(cli: &Cli) -> Result<(SyncEngine, tokio::sync::mpsc::UnboundedReceiver<EngineEvent>)> {
    let config = load_config(cli)?;
    let db = flags_db_path(cli, &config);
    SyncEngine::new(config, &db)
}

fn parse_id(sha1: &str) -> Result<CommitId> {
    CommitId::new(sha1).ok_or_else(|| anyhow!("not a 40-character hex commit id: {sha1}"))
}

fn print_record_line(commit: &Commit) {
    let flags = if commit.flags.is_empty() {
        String::new()
    } else {
        format!("  [{}]", commit.flags.join(","))
    };
    println!(
        "{}  {}  {:<30}  {}{}",
        commit.id.short(),
        commit.time.format("%Y-%m-%d %H:%M"),
        commit.author,
        commit.summary(),
        flags
    );
}

async fn cmd_sync(cli: &Cli) -> Result<()> {
    let (engine, _events) = build_engine(cli)?;
    let commits = engine.resync().await?;
    for commit in &commits {
        print_record_line(commit);
    }
    println!("{} records", commits.len());
    Ok(())
}

async fn cmd_show(cli: &Cli, sha1: &str) -> Result<()> {
    let (engine, _events) = build_engine(cli)?;
    let record = engine.fetch_record(sha1).await?;

    println!("commit:  {}", record.id);
    println!("author:  {}", record.author);
    println!("date:    {}", record.time.format("%Y-%m-%d %H:%M:%S UTC"));
    if !record.flags.is_empty() {
        println!("flags:   {}", record.flags.join(", "));
    }
    println!();
    if let Some(diff) = &record.diff {
        std::io::stdout()
            .write_all(diff)
            .context("failed to write diff")?;
    }
    Ok(())
}

fn cmd_flag(cli: &Cli, action: &FlagAction) -> Result<()> {
    let (engine, _events) = build_engine(cli)?;
    match action {
        FlagAction::Add { sha1, flag } => {
            engine.add_flag(&parse_id(sha1)?, flag)?;
            println!("flagged {} with '{}'", &sha1[..7], flag);
        }
        FlagAction::Remove { sha1, flag } => {
            engine.remove_flag(&parse_id(sha1)?, flag)?;
            println!("unflagged '{}' from {}", flag, &sha1[..7]);
        }
        FlagAction::List { sha1 } => {
            let flags = engine.flags_for(&parse_id(sha1)?)?;
            if flags.is_empty() {
                println!("no flags");
            } else {
                for flag in flags {
                    println!("{flag}");
                }
            }
        }
        FlagAction::Clear { sha1 } => {
            engine.clear_flags_for(&parse_id(sha1)?)?;
            println!("cleared flags of {}", &sha1[..7]);
        }
        FlagAction::ClearAll => {
            engine.clear_all_flags()?;
            println!("cleared all flags");
        }
    }
    Ok(())
}

async fn cmd_watch(cli: &Cli) -> Result<()> {
    let (engine, mut events) = build_engine(cli)?;

    println!("watching {}", engine.config().repository_path.display());
    if let Err(e) = engine.resync().await {
        warn!(error = %e, "initial resync failed");
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    EngineEvent::ResyncRequested => {
                        if let Err(e) = engine.resync().await {
                            warn!(error = %e, "resync failed");
                        }
                    }
                    EngineEvent::ResyncCompleted(commits) => {
                        println!("resynced: {} records", commits.len());
                        if let Some(newest) = commits.last() {
                            print_record_line(newest);
                        }
                    }
                    EngineEvent::ResyncFailed { detail } => {
                        println!("resync failed: {detail}");
                    }
                    EngineEvent::RecordFetched(_)
                    | EngineEvent::RecordFetchFailed { .. }
                    | EngineEvent::StatusChanged(_) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("interrupted");
                break;
            }
        }
    }
    Ok(())
}

fn cmd_config(cli: &Cli, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = EngineConfig::load(&cli.config)?;
            println!("config file:              {}", cli.config.display());
            println!("repository-path:          {}", config.repository_path.display());
            println!("fetch-enabled:            {}", config.fetch_enabled);
            println!("tolerate-fetch-failure:   {}", config.tolerate_fetch_failure);
            println!(
                "history-floor:            {}",
                config
                    .history_floor
                    .map(|f| f.to_rfc3339())
                    .unwrap_or_else(|| "none".into())
            );
            println!("exclude-automated-author: {}", config.exclude_automated_author);
            println!("automated-author:         {}", config.automated_author);
            println!("user-identity:            {}", config.user_identity);
        }
        ConfigAction::Set { key, value } => {
            let mut config = EngineConfig::load(&cli.config)?;
            match key.as_str() {
                "repository-path" => {
                    // Route through the engine so flags tied to the old
                    // repository are wiped with it.
                    let db = flags_db_path(cli, &config);
                    let (engine, _events) = SyncEngine::new(config, &db)?;
                    engine.set_repository_path(PathBuf::from(value))?;
                    config = engine.config();
                }
                "fetch-enabled" => {
                    config.fetch_enabled = parse_bool(value)?;
                }
                "tolerate-fetch-failure" => {
                    config.tolerate_fetch_failure = parse_bool(value)?;
                }
                "history-floor" => {
                    config.history_floor = if value == "none" {
                        None
                    } else {
                        Some(value.parse().with_context(|| {
                            format!("not an RFC 3339 timestamp: {value}")
                        })?)
                    };
                }
                "exclude-automated-author" => {
                    config.exclude_automated_author = parse_bool(value)?;
                }
                "automated-author" => {
                    config.automated_author = value.clone();
                }
                "user-identity" => {
                    config.user_identity = value.clone();
                }
                other => return Err(anyhow!("unknown config key: {other}")),
            }
            config.save(&cli.config)?;
            println!("{key} = {value}");
        }
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" | "on" | "yes" => Ok(true),
        "false" | "off" | "no" => Ok(false),
        other => Err(anyhow!("expected true/false, got {other}")),
    }
}
