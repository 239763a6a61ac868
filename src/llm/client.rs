use crate::config::GenerationSettings;
use crate::error::{GenerationError, GenerationErrorKind};
use crate::llm::types::CompletionResponse;
use async_trait::async_trait;
use log::{debug, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Failure of a single request to the generation service.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("{0}")]
    Other(String),
}

/// One round-trip to a text-generation endpoint. Implementations never retry.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<CompletionResponse, TransportError>;
}

/// Sends prompts through a transport under a fixed retry policy:
/// on a rate-limit signal wait `rate_limit_wait` and retry exactly once; anything else
/// (and any second failure) is fatal. No backoff growth, no jitter.
pub struct GenerationClient<T> {
    transport: T,
    rate_limit_wait: Duration,
}

impl<T: CompletionTransport> GenerationClient<T> {
    pub fn new(transport: T, settings: &GenerationSettings) -> Self {
        Self {
            transport,
            rate_limit_wait: settings.rate_limit_wait(),
        }
    }

    pub fn with_rate_limit_wait(mut self, wait: Duration) -> Self {
        self.rate_limit_wait = wait;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        debug!("Sending prompt ({} chars)", prompt.chars().count());

        let mut attempts = 1;
        let response = match self.transport.complete(prompt).await {
            Ok(response) => response,
            Err(TransportError::RateLimited(message)) => {
                warn!(
                    "Generation service rate limited ({}); retrying once in {:?}",
                    message, self.rate_limit_wait
                );
                sleep(self.rate_limit_wait).await;
                attempts += 1;
                self.transport
                    .complete(prompt)
                    .await
                    .map_err(|e| fatal(e, attempts))?
            }
            Err(e) => return Err(fatal(e, attempts)),
        };

        response.choices.into_iter().next().ok_or_else(|| {
            GenerationError::new(
                GenerationErrorKind::EmptyResponse,
                attempts,
                "Response contained no choices",
            )
        })
    }
}

fn fatal(error: TransportError, attempts: u32) -> GenerationError {
    match error {
        TransportError::RateLimited(message) => {
            GenerationError::new(GenerationErrorKind::RateLimited, attempts, message)
        }
        TransportError::Other(message) => {
            GenerationError::new(GenerationErrorKind::Transport, attempts, message)
        }
    }
}
