use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::worker::DEFAULT_QUEUE_CAPACITY;
use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Screen calls at all. When false every call is allowed.
    pub enabled: bool,
    /// Block VoIP calls that carry no usable caller number.
    pub block_anonymous: bool,
    pub cache_capacity: usize,
    pub queue_capacity: usize,
    /// JSON file holding the block and allow lists.
    pub store_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: true,
            block_anonymous: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            store_path: "/var/lib/callscreen/lists.json".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {path}"))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file: {path}"))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {path}"))?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration file: {path}"))?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache_capacity == 0 {
            anyhow::bail!("cache_capacity must be greater than zero");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than zero");
        }
        if self.store_path.trim().is_empty() {
            anyhow::bail!("store_path must not be empty");
        }
        Ok(())
    }
}
