//! Prompt-in, text-out collaborators used by the compression engine.

use crate::config::{BrainMode, LlmConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("cloud brain URL is not configured (set llm.cloud_url)")]
    CloudNotConfigured,
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Short label recorded in provenance notes, e.g. `ollama:gemma2:2b`.
    fn name(&self) -> String;

    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
    text: Option<String>,
}

/// Ollama-style `/api/generate` endpoint.
pub struct OllamaClient {
    endpoint: String,
    model: String,
    max_tokens: u32,
    http: Client,
}

impl OllamaClient {
    pub fn new(endpoint: &str, model: &str, max_tokens: u32, timeout: Duration) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LlmError::Client)?;

        Ok(Self {
            endpoint: normalize_endpoint(endpoint),
            model: model.to_string(),
            max_tokens,
            http,
        })
    }
}

/// Accept a bare Ollama base URL and point it at the generate route.
fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    if trimmed.ends_with(":11434") {
        format!("{}/api/generate", trimmed)
    } else {
        endpoint.to_string()
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn name(&self) -> String {
        format!("ollama:{}", self.model)
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        log::debug!("Sending prompt to local model {} at {}", self.model, self.endpoint);

        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": { "num_predict": self.max_tokens },
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|source| LlmError::Transport {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        read_completion(&self.endpoint, response).await
    }
}

/// Remote "cloud brain" exposing `POST {base}/generate`.
pub struct CloudClient {
    base_url: String,
    model: String,
    max_tokens: u32,
    http: Client,
}

impl CloudClient {
    pub fn new(base_url: &str, model: &str, max_tokens: u32, timeout: Duration) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LlmError::Client)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_tokens,
            http,
        })
    }
}

#[async_trait]
impl LlmClient for CloudClient {
    fn name(&self) -> String {
        format!("cloud:{}", self.model)
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let endpoint = format!("{}/generate", self.base_url);
        log::debug!("Sending prompt to cloud brain at {}", endpoint);

        let body = serde_json::json!({
            "prompt": prompt,
            "system_prompt": "You are a helpful coding assistant.",
            "model": self.model,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .http
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|source| LlmError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;

        read_completion(&endpoint, response).await
    }
}

async fn read_completion(endpoint: &str, response: reqwest::Response) -> Result<String, LlmError> {
    let status = response.status();
    let text = response.text().await.map_err(|source| LlmError::Transport {
        endpoint: endpoint.to_string(),
        source,
    })?;

    if !status.is_success() {
        return Err(LlmError::Status {
            endpoint: endpoint.to_string(),
            status,
            body: text,
        });
    }

    // Servers that do not wrap the completion get their raw body passed through.
    match serde_json::from_str::<GenerateResponse>(&text) {
        Ok(GenerateResponse {
            response: Some(completion),
            ..
        })
        | Ok(GenerateResponse {
            text: Some(completion),
            ..
        }) => Ok(completion),
        _ => Ok(text),
    }
}

/// Prefers the primary client and falls back to the secondary on any error.
pub struct HybridClient {
    primary: Arc<dyn LlmClient>,
    secondary: Arc<dyn LlmClient>,
}

impl HybridClient {
    pub fn new(primary: Arc<dyn LlmClient>, secondary: Arc<dyn LlmClient>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl LlmClient for HybridClient {
    fn name(&self) -> String {
        format!("{}|{}", self.primary.name(), self.secondary.name())
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        match self.primary.complete(prompt).await {
            Ok(text) => Ok(text),
            Err(e) => {
                log::warn!("{} failed, falling back to {}: {}", self.primary.name(), self.secondary.name(), e);
                self.secondary.complete(prompt).await
            }
        }
    }
}

/// Build the client selected by `llm.mode`.
pub fn client_from_config(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let local = || -> Result<Arc<dyn LlmClient>, LlmError> {
        Ok(Arc::new(OllamaClient::new(
            &config.endpoint,
            &config.model,
            config.max_tokens,
            timeout,
        )?))
    };

    match (config.mode, config.cloud_url.as_deref()) {
        (BrainMode::Local, _) | (BrainMode::Hybrid, None) => local(),
        (BrainMode::Cloud, None) => Err(LlmError::CloudNotConfigured),
        (BrainMode::Cloud, Some(url)) => Ok(Arc::new(CloudClient::new(
            url,
            &config.model,
            config.max_tokens,
            timeout,
        )?)),
        (BrainMode::Hybrid, Some(url)) => {
            let cloud: Arc<dyn LlmClient> = Arc::new(CloudClient::new(
                url,
                &config.model,
                config.max_tokens,
                timeout,
            )?);
            Ok(Arc::new(HybridClient::new(cloud, local()?)))
        }
    }
}
