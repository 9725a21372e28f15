// src/config/mod.rs - Moderation configuration management

use anyhow::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::time::Duration;

use crate::moderation::DEFAULT_REPLACEMENT;
use crate::types::EnabledChecks;

pub const CONFIG_FILE: &str = "config.yaml";
pub const HANDLERS_DIR: &str = "handlers";

/// Everything an operator can tune without recompiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Custom handler id; empty selects the default handler.
    pub handler: String,
    /// When false the pipeline leaves chat untouched.
    pub use_message_handling: bool,
    pub checks: EnabledChecks,
    pub rate_limit_ms: u64,
    pub replacement_char: char,
    /// Upper bound on one custom handler call; 0 disables the bound.
    pub handler_timeout_ms: u64,
    /// Tokens per classifier window when censoring.
    pub classifier_window: usize,
    /// Probability at or above which the classifier calls text bad.
    pub classifier_threshold: f32,
    pub word_lists: WordListPaths,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            handler: String::new(),
            use_message_handling: true,
            checks: EnabledChecks::default(),
            rate_limit_ms: 500,
            replacement_char: DEFAULT_REPLACEMENT,
            handler_timeout_ms: 2000,
            classifier_window: 1,
            classifier_threshold: 0.5,
            word_lists: WordListPaths::default(),
        }
    }
}

impl ModerationConfig {
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        (self.handler_timeout_ms > 0).then(|| Duration::from_millis(self.handler_timeout_ms))
    }

    /// Configured handler id, if any.
    pub fn handler_id(&self) -> Option<&str> {
        let id = self.handler.trim();
        (!id.is_empty()).then_some(id)
    }
}

/// Optional word list overrides. Relative paths resolve against the data directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WordListPaths {
    pub blacklist: Option<PathBuf>,
    pub allowlist: Option<PathBuf>,
    pub longlist: Option<PathBuf>,
}

/// Sanity checks applied to every loaded config.
#[derive(Debug, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, config: &ModerationConfig) -> Result<()> {
        let c = config.replacement_char;
        if c.is_alphanumeric() || c.is_whitespace() {
            return Err(anyhow::anyhow!(
                "replacement_char must not be alphanumeric or whitespace, got {:?}",
                c
            ));
        }

        if config.classifier_window == 0 {
            return Err(anyhow::anyhow!("classifier_window must be at least 1"));
        }

        if !(0.0..=1.0).contains(&config.classifier_threshold) {
            return Err(anyhow::anyhow!(
                "classifier_threshold must be between 0 and 1, got {}",
                config.classifier_threshold
            ));
        }

        if let Some(id) = config.handler_id() {
            self.validate_handler_id(id)?;
        }

        Ok(())
    }

    fn validate_handler_id(&self, id: &str) -> Result<()> {
        if id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(anyhow::anyhow!("Handler id '{}' must be a bare name", id));
        }
        Ok(())
    }
}

/// Owns the data directory: config file plus handler executables.
#[derive(Debug, Clone)]
pub struct ConfigurationManager {
    data_dir: PathBuf,
}

impl ConfigurationManager {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    pub fn handlers_dir(&self) -> PathBuf {
        self.data_dir.join(HANDLERS_DIR)
    }

    /// Create the data directory if needed, then load the config or write a default one.
    pub async fn initialize(&self) -> Result<ModerationConfig> {
        if !self.data_dir.exists() {
            fs::create_dir_all(&self.data_dir).await?;
            info!("Created data directory: {}", self.data_dir.display());
        }

        let handlers = self.handlers_dir();
        if !handlers.exists() {
            fs::create_dir_all(&handlers).await?;
        }

        if !self.config_path().exists() {
            let config = ModerationConfig::default();
            self.save(&config).await?;
            info!("Wrote default configuration to {}", self.config_path().display());
            return Ok(config);
        }

        self.load().await
    }

    pub async fn load(&self) -> Result<ModerationConfig> {
        let path = self.config_path();
        let content = fs::read_to_string(&path).await?;
        let config: ModerationConfig = if content.trim().is_empty() {
            warn!("{} is empty, using defaults", path.display());
            ModerationConfig::default()
        } else {
            serde_yaml::from_str(&content)?
        };

        ConfigValidator::new().validate(&config)?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, config: &ModerationConfig) -> Result<()> {
        ConfigValidator::new().validate(config)?;
        let content = serde_yaml::to_string(config)?;
        fs::write(self.config_path(), content).await?;
        debug!("Saved configuration to {}", self.config_path().display());
        Ok(())
    }
}
