use docchat_core::{Document, Embedding, EmbeddingError, VectorStore};

use crate::RetrievalError;

/// Attaches an embedding to every document, in order. Rejects blank ids
/// before calling the embedder.
pub async fn embed_documents<E>(embedder: &E, docs: Vec<Document>) -> Result<Vec<Document>, RetrievalError>
where
    E: Embedding + ?Sized,
{
    for doc in &docs {
        if doc.id.trim().is_empty() {
            return Err(RetrievalError::InvalidId(doc.id.clone()));
        }
    }
    if docs.is_empty() {
        return Ok(docs);
    }

    let texts: Vec<String> = docs.iter().map(|doc| doc.content.clone()).collect();
    let embeddings = embedder.embed_batch(&texts).await?;
    if embeddings.len() != docs.len() {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            docs.len(),
            embeddings.len()
        ))
        .into());
    }

    Ok(docs
        .into_iter()
        .zip(embeddings)
        .map(|(mut doc, embedding)| {
            doc.embedding = Some(embedding);
            doc
        })
        .collect())
}

/// Embeds documents and writes them to a standalone store.
pub struct Indexer<E, S> {
    embedder: E,
    store: S,
}

impl<E, S> Indexer<E, S>
where
    E: Embedding,
    S: VectorStore,
{
    pub fn new(embedder: E, store: S) -> Self {
        Self { embedder, store }
    }

    pub async fn index(&self, docs: Vec<Document>) -> Result<(), RetrievalError> {
        let count = docs.len();
        let docs = embed_documents(&self.embedder, docs).await?;
        self.store.add(docs).await?;
        tracing::debug!(documents = count, "indexed documents");
        Ok(())
    }
}
