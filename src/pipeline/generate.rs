//! Prompt generation for images that passed the filter.
//!
//! One vision call per image. A failed call is fail-skip: the image simply
//! gets no record and a `PromptSkipped` notice. Nothing is padded, so the
//! record count can be lower than the number of qualifying images.

use super::filter::FilteredImage;
use crate::output::{Notice, PromptRecord, UsageCounters};
use crate::vision::VisionClient;
use tracing::{debug, warn};

/// Result of generating prompts for one file.
#[derive(Debug, Clone, Default)]
pub struct GenerateOutcome {
    /// One record per successful call, in input order.
    pub records: Vec<PromptRecord>,
    pub notices: Vec<Notice>,
}

/// Generate prompts for each image in `images`, sequentially.
pub async fn generate_prompts(
    client: &dyn VisionClient,
    images: &[FilteredImage],
    usage: &mut UsageCounters,
) -> GenerateOutcome {
    let mut outcome = GenerateOutcome::default();

    for filtered in images {
        let source = &filtered.image.source;
        match client.generate(&filtered.image, usage).await {
            Ok(prompts) => {
                debug!(
                    "{} #{}: {} tags, style '{}'",
                    source.file_name,
                    source.index + 1,
                    prompts.tags.len(),
                    prompts.style
                );
                outcome.records.push(PromptRecord {
                    source: source.clone(),
                    analysis: filtered.analysis.clone(),
                    prompts,
                });
            }
            Err(error) => {
                warn!(
                    "{} #{}: prompt generation failed, skipping: {}",
                    source.file_name,
                    source.index + 1,
                    error
                );
                outcome.notices.push(Notice::PromptSkipped {
                    image: source.clone(),
                    error,
                });
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VisionError;
    use crate::output::PromptKind;
    use crate::pipeline::testing::{analysis, raster, ScriptedClient};

    fn filtered(name: &str) -> FilteredImage {
        FilteredImage {
            image: raster(name),
            analysis: analysis(true, 0.9),
        }
    }

    #[tokio::test]
    async fn one_record_per_image_in_order() {
        let client = ScriptedClient::new();
        let images = [filtered("x.png"), filtered("y.png")];

        let mut usage = UsageCounters::default();
        let outcome = generate_prompts(&client, &images, &mut usage).await;

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].source.file_name, "x.png");
        assert_eq!(outcome.records[1].prompt(PromptKind::Video), "video of y.png");
        assert_eq!(outcome.records[0].analysis.confidence, 0.9);
    }

    #[tokio::test]
    async fn failure_skips_without_padding() {
        let client = ScriptedClient::new().generate_err(
            "bad.png",
            VisionError::Schema {
                detail: "missing field `videoPrompt`".into(),
            },
        );
        let images = [filtered("ok.png"), filtered("bad.png"), filtered("fine.png")];

        let mut usage = UsageCounters::default();
        let outcome = generate_prompts(&client, &images, &mut usage).await;

        let names: Vec<_> = outcome
            .records
            .iter()
            .map(|r| r.source.file_name.as_str())
            .collect();
        assert_eq!(names, ["ok.png", "fine.png"]);
        assert_eq!(outcome.notices.len(), 1);
        assert!(matches!(&outcome.notices[0], Notice::PromptSkipped { .. }));
    }
}
