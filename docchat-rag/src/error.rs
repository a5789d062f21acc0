use docchat_core::DocchatError;
use docchat_retrieval::{IngestionError, RetrievalError};

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("ingestion failed: {0}")]
    Ingestion(#[from] IngestionError),
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("generation failed: {0}")]
    Generation(#[from] DocchatError),
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("session has ended")]
    SessionEnded,
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl RagError {
    /// Short label of the failing stage, used as the `source` of chat error events.
    pub fn stage(&self) -> &'static str {
        match self {
            RagError::Ingestion(_) => "ingestion",
            RagError::Retrieval(_) => "retrieval",
            RagError::Generation(_) => "generation",
            RagError::InvalidUpload(_) => "upload",
            RagError::Config(_) => "config",
            RagError::SessionEnded => "session",
            RagError::Runtime(_) => "runtime",
        }
    }
}
