// this_file: src/error.rs
//! Error types for the facecache library

use thiserror::Error;

/// Main error type for facecache operations
#[derive(Debug, Error)]
pub enum Error {
    /// Image decoding or encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO operation error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Face data that decodes but cannot be used
    #[error("Face data error: {0}")]
    FaceData(String),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Background worker could not be started or has stopped
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Result type alias for facecache operations
pub type Result<T> = std::result::Result<T, Error>;
