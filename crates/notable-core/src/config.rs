use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{NotableError, Result};

/// Top-level configuration for the Notable engine.
///
/// Loaded from `~/.notable/config.toml` by default. Missing sections and
/// fields fall back to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotableConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl NotableConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NotableConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.engine.concurrency_limit == 0 {
            return Err(NotableError::Config(
                "engine.concurrency_limit must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(NotableError::Config(format!(
                "llm.temperature must be within 0.0..=2.0, got {}",
                self.llm.temperature
            )));
        }
        Ok(())
    }

    /// Path of the durable note database.
    pub fn db_path(&self) -> PathBuf {
        expand_home(&self.general.data_dir).join(&self.storage.db_file)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the note database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.notable/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Scheduler and runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of notes running at the same time.
    pub concurrency_limit: usize,
    /// Failed attempts allowed before a note is escalated.
    pub max_retries: u32,
    /// Priority subtracted from a note when creating its follow-up sub-task.
    pub follow_up_priority_drop: i64,
    /// Priority added to a note when creating its escalation.
    pub escalation_priority_boost: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            max_retries: 3,
            follow_up_priority_drop: 10,
            escalation_priority_boost: 10,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Persist notes to SQLite. When false, notes live in memory only.
    pub persist: bool,
    /// Database file name, relative to `general.data_dir`.
    pub db_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persist: false,
            db_file: "notes.db".to_string(),
        }
    }
}

/// Language model settings, passed through to the model collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "llama3".to_string(),
            temperature: 0.7,
        }
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"))
        {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn create_temp_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = NotableConfig::default();
        assert_eq!(config.engine.concurrency_limit, 5);
        assert_eq!(config.engine.max_retries, 3);
        assert!(!config.storage.persist);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_full_config() {
        let content = r#"
[general]
data_dir = "/custom/data"
log_level = "debug"

[engine]
concurrency_limit = 2
max_retries = 5
follow_up_priority_drop = 20
escalation_priority_boost = 30

[storage]
persist = true
db_file = "graph.db"

[llm]
model = "mistral"
temperature = 0.2
"#;
        let file = create_temp_config(content);
        let config = NotableConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.engine.concurrency_limit, 2);
        assert_eq!(config.engine.max_retries, 5);
        assert_eq!(config.engine.escalation_priority_boost, 30);
        assert!(config.storage.persist);
        assert_eq!(config.llm.model, "mistral");
        assert_eq!(config.db_path(), PathBuf::from("/custom/data/graph.db"));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[engine]
concurrency_limit = 1
"#;
        let file = create_temp_config(content);
        let config = NotableConfig::load(file.path()).unwrap();
        assert_eq!(config.engine.concurrency_limit, 1);
        assert_eq!(config.engine.max_retries, 3);
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_load_rejects_zero_concurrency() {
        let file = create_temp_config("[engine]\nconcurrency_limit = 0\n");
        let err = NotableConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, NotableError::Config(_)));
        assert!(err.to_string().contains("concurrency_limit"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_temperature() {
        let mut config = NotableConfig::default();
        config.llm.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = NotableConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.notable/data");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = NotableConfig::default();
        config.engine.concurrency_limit = 9;
        config.save(&path).unwrap();

        let reloaded = NotableConfig::load(&path).unwrap();
        assert_eq!(reloaded.engine.concurrency_limit, 9);
        assert_eq!(reloaded.storage.db_file, config.storage.db_file);
    }
}
