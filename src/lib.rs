//! # edgequake-img2prompt
//!
//! Turn batches of images into prompts for text-to-image and text-to-video
//! generators using a Vision Language Model (VLM).
//!
//! ## Why this crate?
//!
//! Writing a good generation prompt for an existing picture is tedious, and
//! not every file in a folder is worth describing. This crate first asks the
//! VLM whether an image is meaningful content (a photo, an illustration, a
//! chart) rather than a blank, a placeholder or a scan artefact, and only
//! then asks it for three prompts: a detailed image prompt, a video prompt
//! describing motion, and a freer creative variant.
//!
//! ## Pipeline Overview
//!
//! ```text
//! files
//!  │
//!  ├─ 1. Intake    size + media-type allow-list        (queue)
//!  ├─ 2. Validate  credential check, once per session  (batch)
//!  ├─ 3. Confirm   cost exposure → RunConfirmation     (batch)
//!  ├─ 4. Extract   one upload → raster images          (pipeline::extract)
//!  ├─ 5. Filter    classify; keep confidence > 0.6     (pipeline::filter)
//!  ├─ 6. Generate  image / video / creative prompts    (pipeline::generate)
//!  └─ 7. Account   tokens + estimated cost             (cost)
//! ```
//!
//! Steps 4 to 6 run per file, strictly one remote call at a time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_img2prompt::{resolve_client, BatchConfig, BatchPipeline, BatchSession, UploadedFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::default();
//!     // Uses OPENAI_API_KEY, or any provider edgequake-llm detects.
//!     let client = resolve_client(&config, None)?;
//!     let pipeline = BatchPipeline::new(client, config);
//!
//!     let mut session = BatchSession::new();
//!     session.enqueue(UploadedFile::from_path("photo.jpg", pipeline.config().max_upload_bytes).await?);
//!
//!     pipeline.validate_credential(&mut session).await?;
//!     let exposure = pipeline.request_run(&session)?;
//!     eprintln!("up to {} API calls", exposure.max_api_calls);
//!
//!     let summary = pipeline.run(&mut session, exposure.confirm()).await?;
//!     for record in summary.records() {
//!         println!("{}", record.prompts.image_prompt);
//!     }
//!     eprintln!("~${:.4}", summary.usage.estimated_cost);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `img2prompt` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-img2prompt = { version = "0.1", default-features = false }
//! ```
//!
//! ## Cost
//!
//! The estimate is `qualifying_images × $0.00765 + tokens × $0.00003`,
//! computed once when the run finishes. Override the unit prices with
//! [`BatchConfigBuilder::pricing`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod cost;
pub mod error;
pub mod export;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod queue;
pub mod vision;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{BatchPipeline, BatchSession, CostExposure, CredentialState, RunConfirmation, RunState};
pub use config::{BatchConfig, BatchConfigBuilder};
pub use cost::{estimate, Pricing};
pub use error::{Img2PromptError, ItemError, UnsupportedFormat, VisionError};
pub use export::{render_json, render_markdown, render_prompts, write_atomic};
pub use output::{
    BatchSummary, FailedFile, FileResult, GeneratedPrompts, ImageAnalysis, Notice, PromptKind,
    PromptRecord, QualifiedImage, UsageCounters,
};
pub use progress::{BatchProgress, BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use queue::{ItemId, ItemStatus, MediaType, UploadedFile};
pub use vision::{resolve_client, VisionClient};
