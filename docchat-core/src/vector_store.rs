use async_trait::async_trait;

use crate::{Document, StoreError};

#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    pub document: Document,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(&self, docs: Vec<Document>) -> Result<(), StoreError>;

    /// Nearest neighbours of `query_embedding`, best first, at most `top_k` of them.
    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>, StoreError>;

    async fn delete(&self, ids: &[String]) -> Result<(), StoreError>;
}

#[async_trait]
impl<T> VectorStore for std::sync::Arc<T>
where
    T: VectorStore + ?Sized,
{
    async fn add(&self, docs: Vec<Document>) -> Result<(), StoreError> {
        (**self).add(docs).await
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        (**self).search(query_embedding, top_k).await
    }

    async fn delete(&self, ids: &[String]) -> Result<(), StoreError> {
        (**self).delete(ids).await
    }
}
