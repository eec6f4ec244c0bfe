//! Error types for the edgequake-img2prompt library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`Img2PromptError`] is **fatal** for the operation that returned it: a file
//!   was rejected at intake, a run was requested without its preconditions, or
//!   the provider could not be configured. Returned as `Err(..)` and never
//!   leaves a session half-mutated.
//!
//! * [`VisionError`], **Per remote call**: the credential check, a
//!   classification or a generation failed. The batch pipeline absorbs these
//!   (fail-open at the filter, fail-skip at the generator) so they surface as
//!   notices, not as run failures.
//!
//! * [`ItemError`], **Per file**: extraction of one queued file failed. The
//!   file is marked failed and recorded in
//!   [`crate::output::FailedFile`]; every other file is still processed.

use crate::queue::MediaType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned by intake, session operations and run preconditions.
#[derive(Debug, Error)]
pub enum Img2PromptError {
    // ── Intake errors ─────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Reading the file failed for another reason (I/O error, a directory
    /// swapped in after the check, ...).
    #[error("Could not read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exceeds the upload size limit.
    #[error("File '{name}' is too large: {size} bytes (limit {limit} bytes)")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    /// The file's media type is not on the upload allow-list.
    #[error("File '{name}' has unsupported type '{media_type}'.\nOnly JPEG, PNG, GIF, WEBP images and PDF files are accepted.")]
    UnsupportedMediaType { name: String, media_type: String },

    // ── Run preconditions ─────────────────────────────────────────────────
    /// No successful credential check has been recorded on the session.
    #[error("The API credential has not been validated.\nRun the credential check before processing.")]
    CredentialNotValidated,

    /// `run` was requested with nothing queued.
    #[error("No files queued; add at least one image before processing")]
    EmptyQueue,

    /// A run is already active on this session.
    #[error("A batch run is already in progress")]
    RunInProgress,

    /// The queue changed after the cost exposure was confirmed.
    #[error(
        "The queue changed after the cost was confirmed ({confirmed} files confirmed, {queued} queued now); confirm again"
    )]
    ConfirmationStale { confirmed: usize, queued: usize },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an export file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single call to the remote vision API.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum VisionError {
    /// The key is malformed or the server rejected it.
    #[error("Invalid API key: {reason}")]
    CredentialInvalid { reason: String },

    /// The request never produced an HTTP response.
    #[error("Network error: {detail}")]
    Network { detail: String },

    /// Non-2xx response carrying the server's message.
    #[error("API error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Api { status: Option<u16>, message: String },

    /// The model's reply did not match the requested JSON schema.
    #[error("Malformed model response: {detail}")]
    Schema { detail: String },
}

impl VisionError {
    /// Whether retrying the same request may succeed.
    ///
    /// Rate limits, server-side failures and transport errors are transient;
    /// credential, client-side (4xx) and schema errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            VisionError::Network { .. } => true,
            VisionError::Api {
                status: Some(status),
                ..
            } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// A short, user-facing explanation of the failure.
    pub fn user_hint(&self) -> String {
        let message = match self {
            VisionError::Api { message, .. } => message.as_str(),
            VisionError::CredentialInvalid { reason } => reason.as_str(),
            VisionError::Network { .. } => {
                return "Could not reach the API. Check your internet connection.".to_string()
            }
            VisionError::Schema { .. } => {
                return "The model returned an unexpected response.".to_string()
            }
        };

        if message.contains("rate_limit") || message.contains("Rate limit") {
            "Rate limit exceeded. Please wait and try again.".to_string()
        } else if message.contains("insufficient_quota") {
            "Insufficient quota. Please check your OpenAI billing.".to_string()
        } else if message.contains("invalid_api_key") || message.contains("Incorrect API key") {
            "Invalid API key. Please check your OpenAI API key.".to_string()
        } else {
            format!("API Error: {message}")
        }
    }
}

/// Signal from the extractor that a file type is accepted but not analysable.
///
/// Non-fatal: the file completes with zero images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{media_type} content extraction is not supported yet; upload images directly")]
pub struct UnsupportedFormat {
    pub media_type: MediaType,
}

/// A non-fatal error for a single queued file.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ItemError {
    /// The payload does not look like the raster type it was declared as.
    #[error("'{file}': declared {declared} but content is {detected}")]
    ContentMismatch {
        file: String,
        declared: MediaType,
        detected: String,
    },

    /// The payload is empty.
    #[error("'{file}': file is empty")]
    EmptyPayload { file: String },
}
