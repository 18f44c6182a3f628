//! Error types for NuBrain

/// Result type alias using NuBrain's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for NuBrain operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input bytes could not be decoded into an image
    #[error("decode error: {0}")]
    Decode(String),

    /// A configured artifact is missing, unreachable or corrupt
    #[error("artifact load error: {0}")]
    ArtifactLoad(String),

    /// A tensor does not have the shape the next stage expects
    #[error("shape mismatch in {stage}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        stage: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Classifier output does not line up with the label space
    #[error("label mismatch: {0}")]
    LabelMismatch(String),

    /// Tensor runtime failures during a forward pass
    #[error("inference error: {0}")]
    Inference(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new artifact load error
    pub fn artifact(msg: impl Into<String>) -> Self {
        Self::ArtifactLoad(msg.into())
    }

    /// Create a new shape mismatch error
    pub fn shape(stage: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            stage: stage.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create a new label mismatch error
    pub fn labels(msg: impl Into<String>) -> Self {
        Self::LabelMismatch(msg.into())
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failure was caused by the caller's input: an image that
    /// does not decode, or a tensor that does not fit the pipeline.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::ShapeMismatch { .. })
    }
}
