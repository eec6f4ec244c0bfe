//! Adapter from an `edgequake_llm` provider to [`VisionClient`].
//!
//! Lets the pipeline run against any backend the provider factory knows
//! (Anthropic, Gemini, Ollama, LM Studio, Azure, …) with the same prompts and
//! the same strict reply parsing as the REST client.
//!
//! Provider errors are mapped onto [`VisionError`] by variant, so the retry
//! rule is the same as the REST client's: only network failures, timeouts and
//! rate limits are retried.

use super::{encode, parse_analysis, parse_prompts, retry_delay, VisionClient};
use crate::config::BatchConfig;
use crate::error::VisionError;
use crate::output::{GeneratedPrompts, ImageAnalysis, UsageCounters};
use crate::prompts::{CLASSIFY_PROMPT, GENERATE_PROMPT};
use crate::queue::RasterImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Vision client backed by an `edgequake_llm` provider.
pub struct ProviderVisionClient {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    classify_max_tokens: usize,
    generate_max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl ProviderVisionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &BatchConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            classify_max_tokens: config.classify_max_tokens,
            generate_max_tokens: config.generate_max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    async fn complete(
        &self,
        instruction: &str,
        image: &RasterImage,
        max_tokens: usize,
        usage: &mut UsageCounters,
    ) -> Result<String, VisionError> {
        let messages = vec![ChatMessage::user_with_images(
            instruction,
            vec![encode::image_data(image)],
        )];
        let options = build_options(self.temperature, max_tokens);

        let mut attempt = 0;
        loop {
            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    let tokens = (response.prompt_tokens + response.completion_tokens) as u64;
                    usage.add_tokens(tokens);
                    debug!("Completion used {} tokens (run total {})", tokens, usage.tokens);
                    return Ok(response.content);
                }
                Err(e) => {
                    let err = vision_error(e);
                    if !err.is_transient() || attempt >= self.max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    let backoff = retry_delay(self.retry_backoff_ms, attempt);
                    warn!(
                        "{} #{}: retry {}/{} after {}ms: {}",
                        image.source.file_name,
                        image.source.index + 1,
                        attempt,
                        self.max_retries,
                        backoff.as_millis(),
                        err
                    );
                    sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait]
impl VisionClient for ProviderVisionClient {
    /// A one-line completion with a one-token budget.
    ///
    /// Only an authentication error from the provider means the credential is
    /// invalid; transport failures surface as [`VisionError::Network`].
    async fn check_credential(&self) -> Result<(), VisionError> {
        let messages = vec![ChatMessage::user_with_images("Reply with OK.", vec![])];
        let options = build_options(self.temperature, 1);

        self.provider
            .chat(&messages, Some(&options))
            .await
            .map(|_| ())
            .map_err(vision_error)
    }

    async fn classify(
        &self,
        image: &RasterImage,
        usage: &mut UsageCounters,
    ) -> Result<ImageAnalysis, VisionError> {
        let reply = self
            .complete(CLASSIFY_PROMPT, image, self.classify_max_tokens, usage)
            .await?;
        parse_analysis(&reply)
    }

    async fn generate(
        &self,
        image: &RasterImage,
        usage: &mut UsageCounters,
    ) -> Result<GeneratedPrompts, VisionError> {
        let reply = self
            .complete(GENERATE_PROMPT, image, self.generate_max_tokens, usage)
            .await?;
        parse_prompts(&reply)
    }
}

/// Map a provider error onto the pipeline's error kinds.
///
/// Rate limits become a 429 so that [`VisionError::is_transient`] treats them
/// like the REST client's. Everything without a dedicated variant is a
/// non-transient API error.
fn vision_error(e: LlmError) -> VisionError {
    match &e {
        LlmError::NetworkError(_) | LlmError::Timeout => VisionError::Network {
            detail: e.to_string(),
        },
        LlmError::AuthError(_) => VisionError::CredentialInvalid {
            reason: e.to_string(),
        },
        LlmError::RateLimited(_) => VisionError::Api {
            status: Some(429),
            message: e.to_string(),
        },
        _ => VisionError::Api {
            status: None,
            message: e.to_string(),
        },
    }
}

/// Build `CompletionOptions` for one call.
fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}
