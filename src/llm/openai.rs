use crate::config::GenerationSettings;
use crate::error::{Result, SimulationError};
use crate::llm::client::{CompletionTransport, TransportError};
use crate::llm::types::{ChatMessage, ChatRequest, ChatResponse, CompletionResponse};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Chat-completions transport over HTTP. A 429 status is reported as rate limiting;
/// every other failure is reported as-is.
#[derive(Clone)]
pub struct ChatCompletionsTransport {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl ChatCompletionsTransport {
    pub fn new(settings: &GenerationSettings, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| {
                SimulationError::InvalidConfig(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key,
            model: settings.model.clone(),
            temperature: settings.temperature,
        })
    }

    /// Reads the API key from the environment variable named in the settings.
    pub fn from_env(settings: &GenerationSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            SimulationError::InvalidConfig(format!(
                "Environment variable {} is not set",
                settings.api_key_env
            ))
        })?;
        Self::new(settings, api_key)
    }
}

#[async_trait]
impl CompletionTransport for ChatCompletionsTransport {
    async fn complete(&self, prompt: &str) -> std::result::Result<CompletionResponse, TransportError> {
        let payload = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            temperature: self.temperature,
        };

        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransportError::Other(format!("Request failed: {}", e)))?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::RateLimited(format!(
                "status {}: {}",
                status, body
            )));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Other(format!(
                "Generation API error (status {}): {}",
                status, body
            )));
        }

        let body: ChatResponse = res
            .json()
            .await
            .map_err(|e| TransportError::Other(format!("Invalid response body: {}", e)))?;

        Ok(CompletionResponse {
            choices: body
                .choices
                .into_iter()
                .map(|c| c.message.content.unwrap_or_default())
                .collect(),
        })
    }
}
