//! Upload intake and the per-file queue model.
//!
//! Files enter the system through [`UploadedFile::from_path`] or
//! [`UploadedFile::from_bytes`], which enforce the upload constraints (size
//! limit and media-type allow-list) before anything is queued. Everything the
//! pipeline later touches is therefore already known to be one of the five
//! accepted types.

use crate::error::Img2PromptError;
use crate::output::PromptRecord;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Default upload size limit: 50 MiB.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Media types accepted at intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Jpeg,
    Png,
    Gif,
    Webp,
    Pdf,
}

impl MediaType {
    /// The MIME string, e.g. `image/png`.
    pub fn mime(self) -> &'static str {
        match self {
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
            MediaType::Gif => "image/gif",
            MediaType::Webp => "image/webp",
            MediaType::Pdf => "application/pdf",
        }
    }

    /// Parse a MIME string. Returns `None` for anything off the allow-list.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(MediaType::Jpeg),
            "image/png" => Some(MediaType::Png),
            "image/gif" => Some(MediaType::Gif),
            "image/webp" => Some(MediaType::Webp),
            "application/pdf" => Some(MediaType::Pdf),
            _ => None,
        }
    }

    /// Guess the media type from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "png" => Some(MediaType::Png),
            "gif" => Some(MediaType::Gif),
            "webp" => Some(MediaType::Webp),
            "pdf" => Some(MediaType::Pdf),
            _ => None,
        }
    }

    /// Raster images go to the vision model; PDFs do not (yet).
    pub fn is_raster(self) -> bool {
        !matches!(self, MediaType::Pdf)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaType::Jpeg => "JPEG",
            MediaType::Png => "PNG",
            MediaType::Gif => "GIF",
            MediaType::Webp => "WEBP",
            MediaType::Pdf => "PDF",
        };
        f.write_str(name)
    }
}

/// A file accepted at intake. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    name: String,
    media_type: MediaType,
    payload: Bytes,
}

impl UploadedFile {
    /// Validate and wrap an in-memory upload.
    ///
    /// `mime` is the declared media type (what a browser would report as
    /// `file.type`); it is checked against the allow-list, and the payload
    /// against `max_bytes`.
    pub fn from_bytes(
        name: impl Into<String>,
        mime: &str,
        payload: impl Into<Bytes>,
        max_bytes: u64,
    ) -> Result<Self, Img2PromptError> {
        let name = name.into();
        let payload = payload.into();

        let size = payload.len() as u64;
        if size > max_bytes {
            return Err(Img2PromptError::FileTooLarge {
                name,
                size,
                limit: max_bytes,
            });
        }

        let media_type =
            MediaType::from_mime(mime).ok_or_else(|| Img2PromptError::UnsupportedMediaType {
                name: name.clone(),
                media_type: mime.to_string(),
            })?;

        Ok(Self {
            name,
            media_type,
            payload,
        })
    }

    /// Read a local file, declaring its media type from the extension.
    ///
    /// The size limit is checked against file metadata before the payload is
    /// read, so oversized files are never loaded into memory.
    pub async fn from_path(path: impl AsRef<Path>, max_bytes: u64) -> Result<Self, Img2PromptError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| io_to_intake_error(path, e))?;
        if !meta.is_file() {
            return Err(Img2PromptError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        if meta.len() > max_bytes {
            return Err(Img2PromptError::FileTooLarge {
                name,
                size: meta.len(),
                limit: max_bytes,
            });
        }

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let media_type =
            MediaType::from_extension(&ext).ok_or_else(|| Img2PromptError::UnsupportedMediaType {
                name: name.clone(),
                media_type: if ext.is_empty() {
                    "unknown".to_string()
                } else {
                    format!(".{ext}")
                },
            })?;

        let payload = tokio::fs::read(path)
            .await
            .map_err(|e| io_to_intake_error(path, e))?;
        debug!("Read '{}' ({} bytes, {})", name, payload.len(), media_type);

        Self::from_bytes(name, media_type.mime(), payload, max_bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Cheap to clone: the payload is reference-counted.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }
}

fn io_to_intake_error(path: &Path, e: std::io::Error) -> Img2PromptError {
    let path: PathBuf = path.to_path_buf();
    match e.kind() {
        std::io::ErrorKind::NotFound => Img2PromptError::FileNotFound { path },
        std::io::ErrorKind::PermissionDenied => Img2PromptError::PermissionDenied { path },
        _ => Img2PromptError::ReadFailed { path, source: e },
    }
}

/// Unique identifier of a queued file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a queued file within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Pending,
    Extracting,
    Filtering,
    Generating,
    Done,
    Failed,
}

impl ItemStatus {
    /// `Done` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Failed)
    }

    /// Any of the three in-flight stages.
    pub fn is_processing(self) -> bool {
        matches!(
            self,
            ItemStatus::Extracting | ItemStatus::Filtering | ItemStatus::Generating
        )
    }
}

/// Reference to an extracted image, stable across the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub file_id: ItemId,
    pub file_name: String,
    /// 0-based position of the image within its file.
    pub index: usize,
    pub media_type: MediaType,
}

/// A raster image ready to send to the vision model.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub source: ImageRef,
    pub bytes: Bytes,
}

/// One queued file and everything the pipeline derived from it.
#[derive(Debug, Clone)]
pub struct QueuedItem {
    pub id: ItemId,
    pub file: UploadedFile,
    pub status: ItemStatus,
    pub images: Vec<ImageRef>,
    pub prompts: Vec<PromptRecord>,
}

impl QueuedItem {
    pub fn new(file: UploadedFile) -> Self {
        Self {
            id: ItemId::new(),
            file,
            status: ItemStatus::Pending,
            images: Vec::new(),
            prompts: Vec::new(),
        }
    }

    /// Return the item to `Pending` with no derived data.
    pub(crate) fn reset(&mut self) {
        self.status = ItemStatus::Pending;
        self.images.clear();
        self.prompts.clear();
    }
}
