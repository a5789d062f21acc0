use async_trait::async_trait;
use docchat_core::SearchResult;

use crate::error::RetrievalError;

/// Object-safe retrieval seam used by the answer chain.
#[async_trait]
pub trait BaseRetriever: Send + Sync {
    /// Up to `top_k` chunks relevant to `query`, most relevant first.
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, RetrievalError>;
}
