//! Instructions sent to the vision model.
//!
//! Both prompts end with the exact JSON shape the reply must have; the client
//! parses the reply directly against that shape, so any edit here must keep
//! the field names in sync with [`crate::output::ImageAnalysis`] and
//! [`crate::output::GeneratedPrompts`].

/// Classification prompt: is this image worth generating prompts for?
pub const CLASSIFY_PROMPT: &str = r#"Analyze this image and determine if it contains meaningful visual content or is just a simple icon/thumbnail.

Consider MEANINGFUL:
- Photographs of people, places, objects, scenes
- Artwork, illustrations, drawings, paintings
- Screenshots with substantial content
- Charts, graphs, diagrams with data
- Complex designs or compositions

Consider NOT meaningful (skip these):
- Simple icons or logos
- Small thumbnails or previews
- Basic geometric shapes
- UI elements like buttons
- Low resolution or pixelated images
- Single-color or gradient backgrounds

Respond ONLY with valid JSON:
{
  "meaningful": true/false,
  "reason": "brief explanation why",
  "confidence": 0.0-1.0,
  "imageType": "photo/artwork/screenshot/icon/etc"
}"#;

/// Generation prompt: three platform-specific prompts plus style metadata.
pub const GENERATE_PROMPT: &str = r#"Analyze this image and create detailed AI prompts for generating similar content.

Generate prompts optimized for different AI platforms:

1. TEXT-TO-IMAGE: Perfect for DALL-E 3, Midjourney, Stable Diffusion
2. TEXT-TO-VIDEO: Optimized for Runway ML, Pika Labs, Gen-2
3. CREATIVE ENHANCED: Artistic interpretation for creative exploration

Focus on:
- Visual style and artistic technique
- Composition and framing
- Lighting, shadows, and mood
- Color palette and contrast
- Subject matter and context
- Camera angle and perspective
- Textures and materials
- Atmosphere and emotion

Respond ONLY with valid JSON:
{
  "imagePrompt": "detailed text-to-image prompt (50-100 words)",
  "videoPrompt": "detailed text-to-video prompt with motion (50-100 words)",
  "creativePrompt": "enhanced artistic interpretation prompt (50-100 words)",
  "tags": ["relevant", "descriptive", "tags"],
  "style": "art style description",
  "mood": "emotional tone/atmosphere",
  "colors": ["dominant", "color", "palette"],
  "lighting": "lighting description",
  "composition": "composition type"
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prompt_names_every_field() {
        for field in ["meaningful", "reason", "confidence", "imageType"] {
            assert!(CLASSIFY_PROMPT.contains(&format!("\"{field}\"")), "{field}");
        }
    }

    #[test]
    fn generate_prompt_names_every_field() {
        for field in [
            "imagePrompt",
            "videoPrompt",
            "creativePrompt",
            "tags",
            "style",
            "mood",
            "colors",
            "lighting",
            "composition",
        ] {
            assert!(GENERATE_PROMPT.contains(&format!("\"{field}\"")), "{field}");
        }
    }
}
