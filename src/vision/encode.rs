//! Image encoding: raw upload bytes → base64 for the multimodal request body.
//!
//! Uploads are already JPEG/PNG/GIF/WEBP, which every vision API accepts, so
//! the bytes are forwarded as-is. Re-encoding would only cost time and, for
//! JPEG, quality.

use crate::queue::RasterImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// `data:<mime>;base64,<payload>` for the OpenAI `image_url` content part.
pub fn data_url(image: &RasterImage) -> String {
    let b64 = STANDARD.encode(&image.bytes);
    debug!(
        "Encoded '{}' #{} → {} bytes base64",
        image.source.file_name,
        image.source.index + 1,
        b64.len()
    );
    format!("data:{};base64,{}", image.source.media_type.mime(), b64)
}

/// The same payload wrapped for an edgequake-llm provider.
pub fn image_data(image: &RasterImage) -> ImageData {
    let b64 = STANDARD.encode(&image.bytes);
    ImageData::new(b64, image.source.media_type.mime())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ImageRef, ItemId, MediaType};
    use bytes::Bytes;

    fn raster(bytes: &'static [u8], media_type: MediaType) -> RasterImage {
        RasterImage {
            source: ImageRef {
                file_id: ItemId::new(),
                file_name: "dot.png".into(),
                index: 0,
                media_type,
            },
            bytes: Bytes::from_static(bytes),
        }
    }

    #[test]
    fn data_url_carries_mime_and_base64() {
        let url = data_url(&raster(b"\x89PNG", MediaType::Png));
        assert!(url.starts_with("data:image/png;base64,"), "got {url}");
        let payload = url.split_once(',').unwrap().1;
        assert_eq!(STANDARD.decode(payload).unwrap(), b"\x89PNG");
    }

    #[test]
    fn image_data_uses_declared_mime() {
        let data = image_data(&raster(b"GIF89a", MediaType::Gif));
        assert_eq!(data.mime_type, "image/gif");
        assert_eq!(STANDARD.decode(&data.data).unwrap(), b"GIF89a");
    }
}
