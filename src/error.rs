//! Error types for the overlay-restore crate.

/// Errors that can occur during watermark detection and repair.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input buffer is empty or its length does not match its dimensions.
    #[error("invalid input buffer: {reason}")]
    Input {
        /// What made the buffer unusable.
        reason: String,
    },

    /// The requested region is degenerate or falls outside the unit square.
    #[error("invalid region: {reason}")]
    Region {
        /// What made the region unusable.
        reason: String,
    },

    /// The image exceeds the resource ceiling and cannot be processed.
    #[error("image too large ({width}x{height}, limit {max_pixels} pixels)")]
    Resource {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Maximum number of pixels the engine accepts.
        max_pixels: u64,
    },

    /// The caller-imposed deadline elapsed before the run finished.
    #[error("run exceeded deadline after {elapsed_ms} ms")]
    Timeout {
        /// Milliseconds elapsed when the deadline check fired.
        elapsed_ms: u128,
    },

    /// The run was cancelled at a band boundary.
    #[error("run cancelled")]
    Cancelled,

    /// Communication with the background execution unit failed.
    #[error("worker channel failure: {0}")]
    Channel(String),

    /// An internal invariant was violated (e.g. non-finite confidence).
    #[error("internal algorithm error: {0}")]
    Algorithm(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred during image processing (load, save, encode).
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
