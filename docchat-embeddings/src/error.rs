use thiserror::Error;
use docchat_core::EmbeddingError;

#[derive(Debug, Error)]
pub enum EmbeddingProviderError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("expected embedding dimension {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl From<EmbeddingProviderError> for EmbeddingError {
    fn from(error: EmbeddingProviderError) -> Self {
        match error {
            EmbeddingProviderError::InvalidResponse(message) => {
                EmbeddingError::InvalidResponse(message)
            }
            EmbeddingProviderError::Request(message) => EmbeddingError::Provider(message),
            EmbeddingProviderError::DimensionMismatch { expected, got } => {
                EmbeddingError::DimensionMismatch { expected, got }
            }
        }
    }
}
