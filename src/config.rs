use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub author: String,
    pub llm: LlmConfig,
    pub compression: CompressionConfig,
    pub live: LiveConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrainMode {
    Local,
    Cloud,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub mode: BrainMode,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub max_decisions: usize,
    pub max_next_steps: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LiveConfig {
    pub queue_capacity: usize,
    pub persist_retries: u32,
    pub git_poll_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            author: "Anonymous".to_string(),
            llm: LlmConfig::default(),
            compression: CompressionConfig::default(),
            live: LiveConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            mode: BrainMode::Hybrid,
            endpoint: "http://localhost:11434/api/generate".to_string(),
            cloud_url: None,
            model: "gemma2:2b".to_string(),
            timeout_secs: 60,
            max_tokens: 512,
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            max_decisions: 10,
            max_next_steps: 10,
            timeout_secs: 10,
        }
    }
}

impl CompressionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            queue_capacity: 64,
            persist_retries: 2,
            git_poll_secs: 2,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig { port: 3000 }
    }
}

impl Config {
    /// Load config from ~/.acss/config.toml, writing defaults on first use
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let default_config = Config::default();
            default_config.save_to(&config_path)?;
            log::info!("Created config file at: {}", config_path.display());
            return Ok(default_config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    /// Save config to ~/.acss/config.toml
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let content_with_header = format!(
            "# acss configuration\n\
             # llm.mode: local (Ollama at llm.endpoint), cloud (llm.cloud_url) or hybrid\n\
             # compression.timeout_secs bounds the LLM call before the heuristic fallback\n\
             \n{}",
            content
        );

        fs::write(path, content_with_header)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    /// Read a dotted key such as `llm.model`.
    pub fn get(&self, key: &str) -> Result<String> {
        let value = match key {
            "author" => self.author.clone(),
            "llm.mode" | "brainMode" => toml_scalar(&self.llm.mode)?,
            "llm.endpoint" | "endpoint" => self.llm.endpoint.clone(),
            "llm.cloud_url" | "cloudUrl" => self.llm.cloud_url.clone().unwrap_or_default(),
            "llm.model" | "model" => self.llm.model.clone(),
            "llm.timeout_secs" => self.llm.timeout_secs.to_string(),
            "llm.max_tokens" => self.llm.max_tokens.to_string(),
            "compression.max_decisions" => self.compression.max_decisions.to_string(),
            "compression.max_next_steps" => self.compression.max_next_steps.to_string(),
            "compression.timeout_secs" => self.compression.timeout_secs.to_string(),
            "live.queue_capacity" => self.live.queue_capacity.to_string(),
            "live.persist_retries" => self.live.persist_retries.to_string(),
            "live.git_poll_secs" => self.live.git_poll_secs.to_string(),
            "stream.port" => self.stream.port.to_string(),
            _ => bail!("Unknown config key: {}", key),
        };
        Ok(value)
    }

    /// Set a dotted key from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "author" => self.author = value.to_string(),
            "llm.mode" | "brainMode" => {
                self.llm.mode = match value {
                    "local" => BrainMode::Local,
                    "cloud" => BrainMode::Cloud,
                    "hybrid" => BrainMode::Hybrid,
                    other => bail!("Invalid brain mode '{}' (expected local, cloud or hybrid)", other),
                }
            }
            "llm.endpoint" | "endpoint" => self.llm.endpoint = value.to_string(),
            "llm.cloud_url" | "cloudUrl" => {
                self.llm.cloud_url = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "llm.model" | "model" => self.llm.model = value.to_string(),
            "llm.timeout_secs" => self.llm.timeout_secs = parse_number(key, value)?,
            "llm.max_tokens" => self.llm.max_tokens = parse_number(key, value)?,
            "compression.max_decisions" => self.compression.max_decisions = parse_number(key, value)?,
            "compression.max_next_steps" => {
                self.compression.max_next_steps = parse_number(key, value)?
            }
            "compression.timeout_secs" => self.compression.timeout_secs = parse_number(key, value)?,
            "live.queue_capacity" => self.live.queue_capacity = parse_number(key, value)?,
            "live.persist_retries" => self.live.persist_retries = parse_number(key, value)?,
            "live.git_poll_secs" => self.live.git_poll_secs = parse_number(key, value)?,
            "stream.port" => self.stream.port = parse_number(key, value)?,
            _ => bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("USERPROFILE")
            .or_else(|_| std::env::var("HOME"))
            .context("Neither USERPROFILE nor HOME environment variable is set")?;

        Ok(PathBuf::from(home).join(".acss").join("config.toml"))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid number for {}: {}", key, value))
}

fn toml_scalar<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value).context("Failed to serialize config value")?;
    Ok(json.as_str().map(str::to_string).unwrap_or_else(|| json.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[llm]\nmodel = \"llama3\"\n\n[live]\nqueue_capacity = 8\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.llm.model, "llama3");
        assert_eq!(config.llm.mode, BrainMode::Hybrid);
        assert_eq!(config.live.queue_capacity, 8);
        assert_eq!(config.live.persist_retries, 2);
        assert_eq!(config.compression.max_decisions, 10);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.set("llm.cloud_url", "https://brain.example").unwrap();
        config.set("stream.port", "4000").unwrap();
        config.save_to(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# acss configuration"));
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn dotted_keys_get_and_set() {
        let mut config = Config::default();
        config.set("model", "llama3").unwrap();
        config.set("llm.mode", "cloud").unwrap();
        assert_eq!(config.get("llm.model").unwrap(), "llama3");
        assert_eq!(config.get("llm.mode").unwrap(), "cloud");
        assert!(config.set("llm.mode", "psychic").is_err());
        assert!(config.set("stream.port", "not-a-port").is_err());
        assert!(config.get("nope").is_err());
    }
}
