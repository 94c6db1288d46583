//! Runtime configuration.
//! Loaded from a JSON file and/or `I18N_*` environment variables, then validated.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::locale::SOURCE_LANG;

/// Default capacity of the render cache.
const DEFAULT_CACHE_MAX_KEYS: usize = 10_000;
/// Default render cache TTL: 6 hours.
const DEFAULT_CACHE_EXPIRE_MS: u64 = 6 * 3600 * 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct I18nConfig {
    /// Maximum number of `(fingerprint, language)` entries kept by the render cache.
    pub cache_max_keys: usize,
    /// Render cache entries not requested for this long are purged.
    pub cache_expire_ms: u64,
    /// Language the application's source strings are written in.
    pub default_language: String,
    /// Locale type used by `translate` when the caller does not pass one.
    pub default_locale_type: String,
    /// SQLite database file. In-memory storage when unset.
    pub database_path: Option<PathBuf>,
    /// Emit JSON log lines instead of the human readable format.
    pub log_json: bool,
}

impl Default for I18nConfig {
    fn default() -> Self {
        Self {
            cache_max_keys: DEFAULT_CACHE_MAX_KEYS,
            cache_expire_ms: DEFAULT_CACHE_EXPIRE_MS,
            default_language: "en".to_string(),
            default_locale_type: "server".to_string(),
            database_path: None,
            log_json: false,
        }
    }
}

impl I18nConfig {
    /// Load configuration from a JSON file. Missing keys take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: I18nConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `I18N_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("I18N_CACHE_MAX_KEYS") {
            self.cache_max_keys = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "I18N_CACHE_MAX_KEYS",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("I18N_CACHE_EXPIRE_MS") {
            self.cache_expire_ms = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "I18N_CACHE_EXPIRE_MS",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("I18N_DEFAULT_LANGUAGE") {
            self.default_language = value.trim().to_lowercase();
        }
        if let Some(value) = lookup("I18N_DEFAULT_LOCALE_TYPE") {
            self.default_locale_type = value;
        }
        if let Some(value) = lookup("I18N_DATABASE_PATH") {
            self.database_path = (!value.is_empty()).then(|| PathBuf::from(value));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_max_keys == 0 {
            return Err(ConfigError::Invalid("cache_max_keys must be > 0".into()));
        }
        if self.default_language.is_empty() || self.default_language == SOURCE_LANG {
            return Err(ConfigError::Invalid(format!(
                "default_language must be a language code, got {:?}",
                self.default_language
            )));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_expire_ms)
    }
}
