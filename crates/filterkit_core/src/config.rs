//! Runtime configuration.
//!
//! # Responsibility
//! - Load runtime settings from JSON and environment overrides.
//! - Reject settings the runtime cannot honour before anything is scanned.

use crate::dictionary::SubstitutionPolicy;
use crate::logging::{default_log_level, normalize_level};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable names read by `apply_env_overrides`.
pub mod env_vars {
    pub const NAMESPACE: &str = "FILTERKIT_NAMESPACE";
    pub const LOG_LEVEL: &str = "FILTERKIT_LOG_LEVEL";
    pub const LOG_DIR: &str = "FILTERKIT_LOG_DIR";
    pub const SUBSTITUTION_DEPTH: &str = "FILTERKIT_SUBSTITUTION_DEPTH";
}

pub const DEFAULT_NAMESPACE: &str = "extensions";
pub const DEFAULT_ARCHIVE_EXTENSION: &str = ".jar";
pub const DEFAULT_CLASS_SUFFIX: &str = ".class";

static NAMESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").expect("valid namespace regex"));

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory for rotating log files; stderr when unset.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Global expression namespace the plugin map is bound under.
    pub namespace: String,
    /// File suffixes accepted as code artifacts.
    pub archive_extensions: Vec<String>,
    /// Entry suffix of compiled-class records inside artifacts.
    pub class_suffix: String,
    /// Maximum substitution steps per lookup; unbounded when unset.
    pub substitution_depth_limit: Option<usize>,
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            archive_extensions: vec![DEFAULT_ARCHIVE_EXTENSION.to_string()],
            class_suffix: DEFAULT_CLASS_SUFFIX.to_string(),
            substitution_depth_limit: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Applies `FILTERKIT_*` environment overrides.
    pub fn apply_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by `env_vars` names.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(namespace) = lookup(env_vars::NAMESPACE) {
            self.namespace = namespace.trim().to_string();
        }
        if let Some(level) = lookup(env_vars::LOG_LEVEL) {
            self.logging.level = level.trim().to_string();
        }
        if let Some(dir) = lookup(env_vars::LOG_DIR) {
            let dir = dir.trim();
            self.logging.directory = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        if let Some(depth) = lookup(env_vars::SUBSTITUTION_DEPTH) {
            let depth = depth.trim();
            self.substitution_depth_limit = if depth.is_empty() {
                None
            } else {
                Some(depth.parse::<usize>().map_err(|err| {
                    ConfigError::Invalid(format!(
                        "{} must be a positive integer, got `{depth}`: {err}",
                        env_vars::SUBSTITUTION_DEPTH
                    ))
                })?)
            };
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !NAMESPACE_RE.is_match(&self.namespace) {
            return Err(ConfigError::Invalid(format!(
                "namespace must be a simple identifier, got `{}`",
                self.namespace
            )));
        }
        if self.archive_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "archive_extensions must not be empty".to_string(),
            ));
        }
        for extension in &self.archive_extensions {
            if !extension.starts_with('.') || extension.len() < 2 {
                return Err(ConfigError::Invalid(format!(
                    "archive extension must start with a dot, got `{extension}`"
                )));
            }
        }
        if !self.class_suffix.starts_with('.') || self.class_suffix.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "class_suffix must start with a dot, got `{}`",
                self.class_suffix
            )));
        }
        if self.substitution_depth_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "substitution_depth_limit must be greater than zero".to_string(),
            ));
        }
        normalize_level(&self.logging.level)
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if let Some(dir) = &self.logging.directory {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "logging.directory must be absolute, got `{}`",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    pub fn substitution_policy(&self) -> SubstitutionPolicy {
        SubstitutionPolicy {
            max_depth: self.substitution_depth_limit,
        }
    }
}
