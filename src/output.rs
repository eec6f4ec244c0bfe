//! Result types produced by a batch run.
//!
//! Everything here is `Serialize` so a whole [`BatchSummary`] can be dumped
//! as JSON by the CLI (`--json`) or by library callers.

use crate::error::{ItemError, UnsupportedFormat, VisionError};
use crate::progress::BatchProgress;
use crate::queue::{ImageRef, ItemId};
use serde::{Deserialize, Serialize};

/// The classifier's verdict on one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysis {
    pub meaningful: bool,
    pub reason: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub image_type: String,
}

impl ImageAnalysis {
    /// Synthesised analysis attached when classification fails.
    pub fn fallback() -> Self {
        Self {
            meaningful: true,
            reason: "analysis failed, included by default".to_string(),
            confidence: 0.5,
            image_type: "unknown".to_string(),
        }
    }
}

/// The nine fields returned by the generation call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPrompts {
    pub image_prompt: String,
    pub video_prompt: String,
    pub creative_prompt: String,
    pub tags: Vec<String>,
    pub style: String,
    pub mood: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition: Option<String>,
}

/// Which of the three target prompts to pick from a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    /// Text-to-image (DALL-E 3, Midjourney, Stable Diffusion).
    Image,
    /// Text-to-video (Runway, Pika).
    Video,
    /// Free artistic interpretation.
    Creative,
}

/// Generated prompts for one surviving image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRecord {
    pub source: ImageRef,
    pub analysis: ImageAnalysis,
    #[serde(flatten)]
    pub prompts: GeneratedPrompts,
}

impl PromptRecord {
    pub fn prompt(&self, kind: PromptKind) -> &str {
        match kind {
            PromptKind::Image => &self.prompts.image_prompt,
            PromptKind::Video => &self.prompts.video_prompt,
            PromptKind::Creative => &self.prompts.creative_prompt,
        }
    }
}

/// An image that passed (or was fail-open included by) the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifiedImage {
    pub image: ImageRef,
    pub analysis: ImageAnalysis,
}

/// Per-file result, appended once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    pub file_id: ItemId,
    pub file_name: String,
    pub images: Vec<QualifiedImage>,
    pub prompts: Vec<PromptRecord>,
}

/// A file that could not be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedFile {
    pub file_id: ItemId,
    pub file_name: String,
    pub error: ItemError,
}

/// Session-wide usage for the current run.
///
/// Reset when a run starts; only ever grows while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounters {
    pub tokens: u64,
    pub estimated_cost: f64,
}

impl UsageCounters {
    pub fn add_tokens(&mut self, tokens: u64) {
        self.tokens = self.tokens.saturating_add(tokens);
    }
}

/// Something worth telling the user about that is not a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// The file was accepted but its type cannot be analysed yet.
    UnsupportedFormat {
        file_name: String,
        format: UnsupportedFormat,
    },
    /// Every extracted image was judged not meaningful.
    NoMeaningfulImages { file_name: String },
    /// Classification failed; the image was included by default.
    ClassificationFallback {
        image: ImageRef,
        error: VisionError,
    },
    /// Generation failed; the image has no prompts.
    PromptSkipped {
        image: ImageRef,
        error: VisionError,
    },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::UnsupportedFormat { file_name, format } => {
                write!(f, "{file_name}: {format}")
            }
            Notice::NoMeaningfulImages { file_name } => {
                write!(f, "{file_name}: no meaningful images found")
            }
            Notice::ClassificationFallback { image, error } => write!(
                f,
                "{} #{}: analysis failed, included by default ({})",
                image.file_name,
                image.index + 1,
                error.user_hint()
            ),
            Notice::PromptSkipped { image, error } => write!(
                f,
                "{} #{}: prompt generation skipped ({})",
                image.file_name,
                image.index + 1,
                error.user_hint()
            ),
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub results: Vec<FileResult>,
    pub failed: Vec<FailedFile>,
    pub notices: Vec<Notice>,
    pub usage: UsageCounters,
    pub progress: BatchProgress,
}

impl BatchSummary {
    /// Qualifying images across all results; the image term of the cost.
    pub fn qualifying_images(&self) -> usize {
        self.results.iter().map(|r| r.images.len()).sum()
    }

    pub fn prompt_count(&self) -> usize {
        self.results.iter().map(|r| r.prompts.len()).sum()
    }

    pub fn records(&self) -> impl Iterator<Item = &PromptRecord> {
        self.results.iter().flat_map(|r| r.prompts.iter())
    }
}
