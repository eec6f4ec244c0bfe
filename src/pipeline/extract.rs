//! Image extraction: one uploaded file → the raster images to analyse.
//!
//! Raster uploads pass through as a single image. PDFs are accepted at intake
//! but their content is not extracted yet; they yield no images and an
//! [`UnsupportedFormat`] signal, which the batch reports as a notice rather
//! than a failure.
//!
//! The payload's magic bytes are checked against the declared type. A file
//! named `photo.png` that is really a ZIP would otherwise be sent to the API,
//! billed, and rejected there.

use crate::error::{ItemError, UnsupportedFormat};
use crate::queue::{ImageRef, ItemId, MediaType, RasterImage, UploadedFile};
use image::ImageFormat;
use tracing::debug;

/// What extraction found in a file.
#[derive(Debug, Clone)]
pub enum Extraction {
    Images(Vec<RasterImage>),
    Unsupported(UnsupportedFormat),
}

impl Extraction {
    /// The extracted images; empty for unsupported formats.
    pub fn into_images(self) -> Vec<RasterImage> {
        match self {
            Extraction::Images(images) => images,
            Extraction::Unsupported(_) => Vec::new(),
        }
    }
}

/// Extract the raster images of `file`, queued as `file_id`.
pub fn extract_images(file_id: ItemId, file: &UploadedFile) -> Result<Extraction, ItemError> {
    let declared = file.media_type();

    if !declared.is_raster() {
        debug!("'{}': {} extraction not supported", file.name(), declared);
        return Ok(Extraction::Unsupported(UnsupportedFormat {
            media_type: declared,
        }));
    }

    if file.payload().is_empty() {
        return Err(ItemError::EmptyPayload {
            file: file.name().to_string(),
        });
    }

    let detected = image::guess_format(file.payload()).map_err(|_| ItemError::ContentMismatch {
        file: file.name().to_string(),
        declared,
        detected: "unrecognised data".to_string(),
    })?;

    if sniffed_media_type(detected) != Some(declared) {
        return Err(ItemError::ContentMismatch {
            file: file.name().to_string(),
            declared,
            detected: format!("{detected:?}"),
        });
    }

    Ok(Extraction::Images(vec![RasterImage {
        source: ImageRef {
            file_id,
            file_name: file.name().to_string(),
            index: 0,
            media_type: declared,
        },
        bytes: file.payload().clone(),
    }]))
}

fn sniffed_media_type(format: ImageFormat) -> Option<MediaType> {
    match format {
        ImageFormat::Jpeg => Some(MediaType::Jpeg),
        ImageFormat::Png => Some(MediaType::Png),
        ImageFormat::Gif => Some(MediaType::Gif),
        ImageFormat::WebP => Some(MediaType::Webp),
        _ => None,
    }
}
