use thiserror::Error;

/// Errors raised by the state comparison and fragmentation core
#[derive(Debug, Error)]
pub enum StateError {
    /// The document tree cannot be walked (cycle, dangling child, missing root)
    #[error("Malformed document tree: {0}")]
    MalformedTree(String),

    /// Two states carry payloads that cannot be compared with each other
    #[error("States {left} and {right} are not comparable: {reason}")]
    Incomparable {
        left: String,
        right: String,
        reason: String,
    },

    /// Two images cannot be compared (dimension mismatch, empty image)
    #[error("Image mismatch: {0}")]
    ImageMismatch(String),

    /// A node path supplied from outside does not resolve in the tree
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The browser driver failed to answer
    #[error("Driver operation failed: {0}")]
    DriverFailed(String),

    /// The page segmentation pass failed
    #[error("Segmentation failed: {0}")]
    SegmentationFailed(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, StateError>;

impl StateError {
    /// Whether the error is a programming error on the input (fail fast) rather than
    /// a per-item failure that callers may log and skip
    pub fn is_fatal(&self) -> bool {
        matches!(self, StateError::MalformedTree(_) | StateError::InvalidConfig(_))
    }
}
