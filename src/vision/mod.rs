//! The remote vision model, behind one trait.
//!
//! [`VisionClient`] is the seam between the batch pipeline and the network.
//! Two implementations ship with the crate:
//!
//! * [`http::HttpVisionClient`]: speaks the OpenAI chat-completions wire
//!   format directly and owns the `GET /models` credential check.
//! * [`provider::ProviderVisionClient`]: adapts any `edgequake_llm`
//!   provider (Anthropic, Gemini, Ollama, …).
//!
//! Clients parse the model's reply strictly: a reply that is not exactly the
//! requested JSON shape is a [`VisionError::Schema`]. Deciding what to do
//! about a failed call is the pipeline's job, not the client's.

pub mod encode;
pub mod http;
pub mod provider;

use crate::config::BatchConfig;
use crate::error::{Img2PromptError, VisionError};
use crate::output::{GeneratedPrompts, ImageAnalysis, UsageCounters};
use crate::queue::RasterImage;
use async_trait::async_trait;
use edgequake_llm::ProviderFactory;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use http::HttpVisionClient;
pub use provider::ProviderVisionClient;

/// A remote vision-capable model.
///
/// Each call adds the token usage reported for it to `usage`, including calls
/// whose reply then fails to parse.
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Check the credential this client was built with.
    async fn check_credential(&self) -> Result<(), VisionError>;

    /// Ask whether `image` is meaningful content.
    async fn classify(
        &self,
        image: &RasterImage,
        usage: &mut UsageCounters,
    ) -> Result<ImageAnalysis, VisionError>;

    /// Generate the platform prompts for `image`.
    async fn generate(
        &self,
        image: &RasterImage,
        usage: &mut UsageCounters,
    ) -> Result<GeneratedPrompts, VisionError>;
}

/// Parse a classification reply.
pub fn parse_analysis(reply: &str) -> Result<ImageAnalysis, VisionError> {
    let analysis: ImageAnalysis =
        serde_json::from_str(reply.trim()).map_err(|e| VisionError::Schema {
            detail: format!("classification reply: {e}"),
        })?;

    if !(0.0..=1.0).contains(&analysis.confidence) {
        return Err(VisionError::Schema {
            detail: format!("confidence {} outside [0, 1]", analysis.confidence),
        });
    }

    Ok(analysis)
}

/// Parse a generation reply. Duplicate tags are dropped, first one wins.
pub fn parse_prompts(reply: &str) -> Result<GeneratedPrompts, VisionError> {
    let mut prompts: GeneratedPrompts =
        serde_json::from_str(reply.trim()).map_err(|e| VisionError::Schema {
            detail: format!("generation reply: {e}"),
        })?;

    let mut seen = std::collections::HashSet::new();
    prompts.tags.retain(|tag| seen.insert(tag.clone()));

    Ok(prompts)
}

/// Longest wait between two attempts, whatever `max_retries` is.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Delay before retry number `attempt` (1-based): `base_ms * 2^(attempt-1)`,
/// saturating and clamped to [`MAX_RETRY_DELAY`].
pub(crate) fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_RETRY_DELAY)
}

/// Pick a vision client, from most-specific to least-specific.
///
/// 1. **Named provider** (`config.provider_name`): built through
///    [`ProviderFactory::create_llm_provider`], which reads that provider's
///    own API key variable.
/// 2. **Explicit key** (`api_key`): the built-in OpenAI REST client.
/// 3. **`OPENAI_API_KEY`**: the built-in OpenAI REST client.
/// 4. **Full auto-detection** ([`ProviderFactory::from_env`]).
pub fn resolve_client(
    config: &BatchConfig,
    api_key: Option<&str>,
) -> Result<Arc<dyn VisionClient>, Img2PromptError> {
    if let Some(ref name) = config.provider_name {
        debug!("Using edgequake-llm provider '{}' ({})", name, config.model);
        let llm = ProviderFactory::create_llm_provider(name, &config.model).map_err(|e| {
            Img2PromptError::ProviderNotConfigured {
                provider: name.clone(),
                hint: format!("{e}"),
            }
        })?;
        return Ok(Arc::new(ProviderVisionClient::new(llm, config)));
    }

    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        return Ok(Arc::new(HttpVisionClient::new(key, config)?));
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            return Ok(Arc::new(HttpVisionClient::new(key, config)?));
        }
    }

    let (llm, _embedding) =
        ProviderFactory::from_env().map_err(|e| Img2PromptError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Pass --api-key, set OPENAI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(Arc::new(ProviderVisionClient::new(llm, config)))
}
