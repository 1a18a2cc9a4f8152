use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::bail;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Refresh interval in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// HTTP timeout for a single feed download, in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    pub default_source: Option<String>,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SourceConfig {
    pub url: String,
    /// Display name; the source key is shown when absent
    pub name: Option<String>,
}

impl SourceConfig {
    pub fn display_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(key)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.refresh_interval == 0 {
            bail!("refresh_interval must be greater than zero");
        }

        for key in self.sources.keys() {
            if !is_valid_source_key(key) {
                bail!(
                    "invalid source key '{}': use ASCII letters, digits, '_' or '-'",
                    key
                );
            }
        }

        if let Some(default) = &self.default_source {
            if !self.sources.contains_key(default) {
                bail!("default_source '{}' is not a configured source", default);
            }
        }

        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    /// The source served when a request names none.
    pub fn default_source_key(&self) -> Option<&str> {
        self.default_source
            .as_deref()
            .or_else(|| self.sources.keys().next().map(String::as_str))
    }

    pub fn source(&self, key: &str) -> Option<&SourceConfig> {
        self.sources.get(key)
    }
}

// Keys end up in cache file names.
fn is_valid_source_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
