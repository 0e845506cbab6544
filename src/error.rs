use thiserror::Error;

/// The central error type for input acquisition, encoding and tool execution.
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to download from URL: {0}")]
    Download(#[from] reqwest::Error),

    #[error("failed to read image from {path}: {reason}")]
    UnreadableImage { path: String, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to encode output: {0}")]
    Encode(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, VisionError>;
