use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Configuration for git-remote-cas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// Root directory of the content-addressable store
    #[serde(default = "defaults::store_dir")]
    pub store_dir: PathBuf,
    /// tracing filter used when RUST_LOG and the CLI flags say nothing
    #[serde(default)]
    pub log_level: Option<String>,
    /// Branch advertised as the remote's HEAD
    #[serde(default = "defaults::default_branch")]
    pub default_branch: String,
    /// Draw a spinner on stderr while objects are transferred
    #[serde(default = "defaults::progress")]
    pub progress: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            store_dir: defaults::store_dir(),
            log_level: None,
            default_branch: defaults::default_branch(),
            progress: defaults::progress(),
        }
    }
}

impl RemoteConfig {
    /// Load configuration from the config file (if any) and the environment
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        tracing::debug!("loading git-remote-cas config from {:?}", config_path);
        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: RemoteConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.store_dir = expand_tilde(&config.store_dir);
        Ok(config)
    }

    /// Apply `GIT_CAS_*` overrides; `lookup` reads one variable
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("GIT_CAS_STORE_DIR") {
            self.store_dir = expand_tilde(&PathBuf::from(path));
        }

        if let Some(level) = lookup("GIT_CAS_LOGLEVEL") {
            self.log_level = Some(level);
        }

        if let Some(branch) = lookup("GIT_CAS_DEFAULT_BRANCH") {
            self.default_branch = branch;
        }
    }

    /// Get default config file path
    pub fn config_file_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".config/git-remote-cas/config.yaml"))
            .context("Could not determine home directory for config file")
    }

    /// Get store directory, creating it if necessary
    pub fn ensure_store_dir(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.store_dir)
            .with_context(|| format!("Failed to create store directory: {:?}", self.store_dir))?;
        Ok(self.store_dir.clone())
    }
}

mod defaults {
    use std::path::PathBuf;

    pub(crate) fn store_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("git-remote-cas")
    }

    pub(crate) fn default_branch() -> String {
        "refs/heads/master".to_string()
    }

    pub(crate) fn progress() -> bool {
        true
    }
}
