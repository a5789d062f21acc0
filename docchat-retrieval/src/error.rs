use std::path::PathBuf;

use docchat_core::{EmbeddingError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid document id: {0}")]
    InvalidId(String),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// Failures while loading, chunking or indexing source documents.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("unsupported file extension '{extension}' for {}", path.display())]
    UnsupportedExtension { path: PathBuf, extension: String },
    #[error("no documents found in {}", path.display())]
    NoDocuments { path: PathBuf },
    #[error("invalid document id: {0}")]
    InvalidId(String),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<RetrievalError> for IngestionError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::InvalidId(id) => IngestionError::InvalidId(id),
            RetrievalError::Embedding(err) => IngestionError::Embedding(err),
            RetrievalError::Store(err) => IngestionError::Store(err),
        }
    }
}
