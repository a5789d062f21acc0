use async_trait::async_trait;
use docchat_core::{Embedding, SearchResult, VectorStore};

use crate::{BaseRetriever, RetrievalError};

/// Embeds the query with the indexing embedder and searches the store.
pub struct Retriever<E, S> {
    embedder: E,
    store: S,
}

impl<E, S> Retriever<E, S>
where
    E: Embedding,
    S: VectorStore,
{
    pub fn new(embedder: E, store: S) -> Self {
        Self { embedder, store }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        let embedding = self.embedder.embed(query).await?;
        let results = self.store.search(&embedding, top_k).await?;
        tracing::debug!(top_k, hits = results.len(), "retrieved chunks");
        Ok(results)
    }
}

#[async_trait]
impl<E, S> BaseRetriever for Retriever<E, S>
where
    E: Embedding + Send + Sync,
    S: VectorStore + Send + Sync,
{
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        Retriever::retrieve(self, query, top_k).await
    }
}
