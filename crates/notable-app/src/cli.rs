//! CLI argument definitions for the Notable application.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use notable_core::config::NotableConfig;

/// Priority given to tasks that do not name one.
pub const DEFAULT_TASK_PRIORITY: i64 = 50;

/// Notable - runs note-based tasks through a priority scheduler.
#[derive(Parser, Debug)]
#[command(name = "notable", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Data directory for the note database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Maximum number of notes running at once.
    #[arg(short = 'j', long = "concurrency")]
    pub concurrency: Option<usize>,

    /// Persist notes to the database instead of keeping them in memory.
    #[arg(long = "persist")]
    pub persist: bool,

    /// Tasks to run, as `TITLE` or `TITLE@PRIORITY`.
    pub tasks: Vec<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > NOTABLE_CONFIG env var > ~/.notable/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("NOTABLE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut NotableConfig) {
        if let Some(ref dir) = self.data_dir {
            config.general.data_dir = dir.to_string_lossy().to_string();
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(limit) = self.concurrency {
            config.engine.concurrency_limit = limit;
        }
        if self.persist {
            config.storage.persist = true;
        }
    }

    /// Parsed `(title, priority)` pairs for the positional tasks.
    pub fn parsed_tasks(&self) -> Vec<(String, i64)> {
        self.tasks.iter().map(|t| parse_task_arg(t)).collect()
    }
}

/// Split `TITLE@PRIORITY`. A missing or non-numeric priority keeps the whole
/// string as the title.
pub fn parse_task_arg(arg: &str) -> (String, i64) {
    if let Some((title, priority)) = arg.rsplit_once('@') {
        if let Ok(priority) = priority.trim().parse::<i64>() {
            return (title.trim().to_string(), priority);
        }
    }
    (arg.trim().to_string(), DEFAULT_TASK_PRIORITY)
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".notable").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".notable").join("config.toml");
    }
    PathBuf::from("config.toml")
}
