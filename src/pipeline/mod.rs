//! Per-file pipeline stages.
//!
//! Each submodule implements exactly one step; [`crate::batch`] sequences
//! them and owns all accounting.
//!
//! ## Data Flow
//!
//! ```text
//! UploadedFile ──▶ extract ──▶ filter ──▶ generate ──▶ FileResult
//!                  (sniff)     (classify)  (prompts)
//! ```
//!
//! 1. [`extract`] : turn one upload into the raster images to analyse
//! 2. [`filter`]  : keep meaningful images; **fail-open** on errors
//! 3. [`generate`]: produce prompts per kept image; **fail-skip** on errors
//!
//! The two error policies differ on purpose. A failed classification must
//! never silently drop a user's image, so it is included by default. A failed
//! generation just means one image has no prompts, so it is skipped. Making
//! the two uniform would either lose content or pad results with placeholders.

pub mod extract;
pub mod filter;
pub mod generate;

pub use extract::{extract_images, Extraction};
pub use filter::{filter_meaningful, FilterOutcome, FilteredImage, MEANINGFUL_CONFIDENCE_THRESHOLD};
pub use generate::{generate_prompts, GenerateOutcome};

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted in-process [`VisionClient`] for unit tests.

    use crate::error::VisionError;
    use crate::output::{GeneratedPrompts, ImageAnalysis, UsageCounters};
    use crate::queue::{ImageRef, ItemId, MediaType, RasterImage};
    use crate::vision::VisionClient;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::Mutex;

    type Scripted<T> = Result<(T, u64), VisionError>;

    /// Replies keyed by image file name. Unscripted images classify as
    /// meaningful (0.9) and generate a prompt naming the file, both free.
    #[derive(Default)]
    pub struct ScriptedClient {
        classify: HashMap<String, Scripted<ImageAnalysis>>,
        generate: HashMap<String, Scripted<GeneratedPrompts>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn classify_as(mut self, name: &str, meaningful: bool, confidence: f64) -> Self {
            self.classify
                .insert(name.to_string(), Ok((analysis(meaningful, confidence), 0)));
            self
        }

        pub fn classify_err(mut self, name: &str, err: VisionError) -> Self {
            self.classify.insert(name.to_string(), Err(err));
            self
        }

        pub fn generate_err(mut self, name: &str, err: VisionError) -> Self {
            self.generate.insert(name.to_string(), Err(err));
            self
        }
    }

    pub fn analysis(meaningful: bool, confidence: f64) -> ImageAnalysis {
        ImageAnalysis {
            meaningful,
            reason: "scripted".into(),
            confidence,
            image_type: "photo".into(),
        }
    }

    pub fn prompts_for(name: &str) -> GeneratedPrompts {
        GeneratedPrompts {
            image_prompt: format!("image of {name}"),
            video_prompt: format!("video of {name}"),
            creative_prompt: format!("dream of {name}"),
            tags: vec![name.to_string()],
            style: "photo".into(),
            mood: "calm".into(),
            ..Default::default()
        }
    }

    pub fn raster(name: &str) -> RasterImage {
        RasterImage {
            source: ImageRef {
                file_id: ItemId::new(),
                file_name: name.to_string(),
                index: 0,
                media_type: MediaType::Png,
            },
            bytes: Bytes::from_static(b"\x89PNG\r\n\x1a\n"),
        }
    }

    #[async_trait]
    impl VisionClient for ScriptedClient {
        async fn check_credential(&self) -> Result<(), VisionError> {
            Ok(())
        }

        async fn classify(
            &self,
            image: &RasterImage,
            usage: &mut UsageCounters,
        ) -> Result<ImageAnalysis, VisionError> {
            let name = &image.source.file_name;
            self.calls.lock().unwrap().push(format!("classify {name}"));
            match self.classify.get(name) {
                Some(Ok((a, tokens))) => {
                    usage.add_tokens(*tokens);
                    Ok(a.clone())
                }
                Some(Err(e)) => Err(e.clone()),
                None => Ok(analysis(true, 0.9)),
            }
        }

        async fn generate(
            &self,
            image: &RasterImage,
            usage: &mut UsageCounters,
        ) -> Result<GeneratedPrompts, VisionError> {
            let name = &image.source.file_name;
            self.calls.lock().unwrap().push(format!("generate {name}"));
            match self.generate.get(name) {
                Some(Ok((p, tokens))) => {
                    usage.add_tokens(*tokens);
                    Ok(p.clone())
                }
                Some(Err(e)) => Err(e.clone()),
                None => Ok(prompts_for(name)),
            }
        }
    }
}
