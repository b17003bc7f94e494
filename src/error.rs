//! Crate-wide error type.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the bridge.
///
/// An empty window is not an error; see `dispatcher::CycleOutcome`.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// An image or video path could not be opened or read.
    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// The chat-completion API returned an error or an unusable response.
    #[error("remote call failed: {0}")]
    RemoteCallFailed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
