//! Meaningful-image filter.
//!
//! Each image is classified with one vision call. An image qualifies when the
//! model says it is meaningful **and** its confidence is strictly above
//! [`MEANINGFUL_CONFIDENCE_THRESHOLD`].
//!
//! Failures are fail-open: when classification errors for any reason the
//! image is kept with [`ImageAnalysis::fallback`] and a notice is raised, so a
//! flaky network never makes a user's photo disappear from the results.

use crate::output::{ImageAnalysis, Notice, UsageCounters};
use crate::queue::RasterImage;
use crate::vision::VisionClient;
use tracing::{debug, warn};

/// Confidence must be strictly greater than this for an image to qualify.
pub const MEANINGFUL_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// An image that survived the filter, with the analysis that admitted it.
#[derive(Debug, Clone)]
pub struct FilteredImage {
    pub image: RasterImage,
    pub analysis: ImageAnalysis,
}

/// Result of filtering one file's images.
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    /// Kept images, in input order.
    pub kept: Vec<FilteredImage>,
    /// One `ClassificationFallback` notice per failed classification.
    pub notices: Vec<Notice>,
}

/// Whether `analysis` admits its image.
pub fn qualifies(analysis: &ImageAnalysis) -> bool {
    analysis.meaningful && analysis.confidence > MEANINGFUL_CONFIDENCE_THRESHOLD
}

/// Classify `images` one at a time and keep the meaningful ones.
///
/// Calls are strictly sequential: the next request is issued only after the
/// previous one has returned. Tokens reported by each call are added to
/// `usage` whether or not the reply parses.
pub async fn filter_meaningful(
    client: &dyn VisionClient,
    images: Vec<RasterImage>,
    usage: &mut UsageCounters,
) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();

    for image in images {
        let analysis = match client.classify(&image, usage).await {
            Ok(analysis) => {
                if !qualifies(&analysis) {
                    debug!(
                        "{} #{}: excluded ({}, confidence {:.2})",
                        image.source.file_name,
                        image.source.index + 1,
                        analysis.reason,
                        analysis.confidence
                    );
                    continue;
                }
                analysis
            }
            Err(error) => {
                warn!(
                    "{} #{}: classification failed, keeping image: {}",
                    image.source.file_name,
                    image.source.index + 1,
                    error
                );
                outcome.notices.push(Notice::ClassificationFallback {
                    image: image.source.clone(),
                    error,
                });
                ImageAnalysis::fallback()
            }
        };
        outcome.kept.push(FilteredImage { image, analysis });
    }

    outcome
}
