//! Generation providers.
//!
//! The engine only ever sees `dyn Generator`; the Ollama client is the one
//! concrete backend. Tests script their own.

use std::time::Duration;

use docsage_core::{Error, GenerationConfig, Result};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use crate::types::GenerationRequest;

/// A text generation backend. Object safe so the engine can hold any
/// implementation behind an `Arc`.
pub trait Generator: Send + Sync {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> BoxFuture<'a, Result<String>>;

    fn name(&self) -> &str;
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

/// Non-streaming client for Ollama's `/api/generate`.
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: config.timeout(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether the server answers its model listing.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Ollama health check failed: {}", e);
                false
            }
        }
    }

    async fn call(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });

        debug!(
            "Ollama {:?} request: {} prompt chars, max {} tokens",
            request.kind,
            request.prompt.len(),
            request.max_tokens
        );

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!("Ollama error {}: {}", status, text);
            return Err(Error::GenerationUnavailable(format!("HTTP {}: {}", status, text)));
        }

        let parsed: OllamaResponse = resp
            .json()
            .await
            .map_err(|e| self.map_transport(e))?;
        let text = parsed.response.trim().to_string();
        if text.is_empty() {
            return Err(Error::GenerationUnavailable("empty response".into()));
        }
        Ok(text)
    }

    fn map_transport(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::GenerationTimeout(self.timeout)
        } else {
            Error::GenerationUnavailable(e.to_string())
        }
    }
}

impl Generator for OllamaGenerator {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.call(request))
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PromptKind;

    #[test]
    fn test_base_url_is_normalized() {
        let config = GenerationConfig {
            base_url: "http://localhost:11434/".into(),
            ..GenerationConfig::default()
        };
        let generator = OllamaGenerator::new(&config).unwrap();
        assert_eq!(generator.base_url, "http://localhost:11434");
        assert_eq!(generator.model(), "mistral");
        assert_eq!(generator.name(), "ollama");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // Port 9 (discard) is not an HTTP server on any test host.
        let config = GenerationConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..GenerationConfig::default()
        };
        let generator = OllamaGenerator::new(&config).unwrap();
        let request = GenerationRequest::new(PromptKind::Answer, "hello", &config);
        let err = generator.generate(&request).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!generator.is_available().await);
    }
}
