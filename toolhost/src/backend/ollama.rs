//! Minimal Ollama REST client for model management

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::BackendResult;

/// Timeout for catalog requests
const LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the fire-and-forget load request
pub const WARM_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a blocking model pull
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Information about an available model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<ModelInfo>,
}

/// Whether `tag` names one of `models`; a bare name matches its `:latest` tag
pub fn has_model(models: &[ModelInfo], tag: &str) -> bool {
    let wanted = if tag.contains(':') {
        tag.to_string()
    } else {
        format!("{}:latest", tag)
    };
    models.iter().any(|m| m.name == tag || m.name == wanted)
}

/// Client for the native (non-OpenAI) Ollama API
#[derive(Debug, Clone)]
pub struct OllamaApi {
    client: reqwest::Client,
    origin: String,
}

impl OllamaApi {
    /// `origin` is `scheme://host:port` without the `/v1` suffix
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            origin: origin.into().trim_end_matches('/').to_string(),
        }
    }

    /// List locally available models
    pub async fn list_models(&self) -> BackendResult<Vec<ModelInfo>> {
        let response: OllamaTagsResponse = self
            .client
            .get(format!("{}/api/tags", self.origin))
            .timeout(LIST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.models)
    }

    /// Download `model`, blocking until Ollama reports completion
    pub async fn pull(&self, model: &str, timeout: Duration) -> BackendResult<()> {
        tracing::info!("Pulling model {} (this can take a while)", model);
        self.client
            .post(format!("{}/api/pull", self.origin))
            .json(&json!({ "model": model, "stream": false }))
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Ask Ollama to load `model` into memory.
    ///
    /// Ollama answers as soon as loading has been scheduled.
    pub async fn warm(&self, model: &str) -> BackendResult<()> {
        self.client
            .post(format!("{}/api/generate", self.origin))
            .json(&json!({ "model": model }))
            .timeout(WARM_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
