use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// One line per message, appended to the output.
    #[default]
    Container,
    /// Numbered entries kept in a bounded transcript.
    Transcript,
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkKind::Container => write!(f, "container"),
            SinkKind::Transcript => write!(f, "transcript"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub view: ViewConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl PollConfig {
    /// How long to wait after a failed `receive_message` before trying again.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewConfig {
    #[serde(default)]
    pub sink: SinkKind,
    /// Transcript capacity, only used by the transcript sink.
    #[serde(default = "default_history")]
    pub history: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::default(),
            history: default_history(),
        }
    }
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_history() -> usize {
    200
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.base_url.trim().is_empty() {
            anyhow::bail!("[endpoint] base_url must not be empty");
        }
        if self.view.history == 0 {
            anyhow::bail!("[view] history must be at least 1");
        }
        Ok(())
    }
}
