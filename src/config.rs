//! Configuration for a batch run.
//!
//! All pipeline behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. Keeping every knob in one struct makes it easy to
//! share a config between the credential check and the run, and to log it.

use crate::cost::Pricing;
use crate::error::Img2PromptError;
use crate::progress::ProgressCallback;
use crate::queue::MAX_UPLOAD_BYTES;
use std::fmt;

/// Default OpenAI-compatible API root.
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for credential checks and batch runs.
///
/// Built via [`BatchConfig::builder()`] or using [`BatchConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_img2prompt::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .model("gpt-4o-mini")
///     .max_retries(1)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Root of the OpenAI-compatible REST API. Default: [`DEFAULT_API_BASE_URL`].
    pub api_base_url: String,

    /// Vision model identifier. Default: `gpt-4o`.
    pub model: String,

    /// Named edgequake-llm provider (e.g. "anthropic", "gemini", "ollama").
    ///
    /// When set, requests go through the provider abstraction instead of the
    /// built-in OpenAI REST client.
    pub provider_name: Option<String>,

    /// Sampling temperature. Default: 0.7.
    ///
    /// Prompt generation benefits from some creativity; classification is
    /// robust to it because only the booleans and confidence are used.
    pub temperature: f32,

    /// Token ceiling for the classification call. Default: 500.
    pub classify_max_tokens: usize,

    /// Token ceiling for the generation call. Default: 800.
    ///
    /// Three 50–100 word prompts plus tags and palette fit comfortably; lower
    /// values truncate the JSON and turn every reply into a schema error.
    pub generate_max_tokens: usize,

    /// Retries on a transient failure (429, 5xx, transport). Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-request timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Upload size limit enforced at intake. Default: 50 MiB.
    pub max_upload_bytes: u64,

    /// Unit prices for the end-of-run cost estimate.
    pub pricing: Pricing,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            provider_name: None,
            temperature: 0.7,
            classify_max_tokens: 500,
            generate_max_tokens: 800,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            max_upload_bytes: MAX_UPLOAD_BYTES,
            pricing: Pricing::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("api_base_url", &self.api_base_url)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("temperature", &self.temperature)
            .field("classify_max_tokens", &self.classify_max_tokens)
            .field("generate_max_tokens", &self.generate_max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("pricing", &self.pricing)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn classify_max_tokens(mut self, n: usize) -> Self {
        self.config.classify_max_tokens = n;
        self
    }

    pub fn generate_max_tokens(mut self, n: usize) -> Self {
        self.config.generate_max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn pricing(mut self, pricing: Pricing) -> Self {
        self.config.pricing = pricing;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, Img2PromptError> {
        let c = &self.config;
        if c.api_base_url.is_empty() {
            return Err(Img2PromptError::InvalidConfig(
                "API base URL must not be empty".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(Img2PromptError::InvalidConfig("Model must not be empty".into()));
        }
        if c.classify_max_tokens == 0 || c.generate_max_tokens == 0 {
            return Err(Img2PromptError::InvalidConfig(
                "Token ceilings must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(Img2PromptError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.pricing.per_image < 0.0 || c.pricing.per_output_token < 0.0 {
            return Err(Img2PromptError::InvalidConfig(
                "Prices must not be negative".into(),
            ));
        }
        Ok(self.config)
    }
}
