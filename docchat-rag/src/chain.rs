use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use docchat_core::{DocchatError, SearchResult};
use docchat_retrieval::BaseRetriever;

use crate::generate::{source_refs, AnswerEvent, AnswerGenerator, RagAnswer};
use crate::RagError;

/// Retrieval followed by one generation, the "stuff" way.
#[derive(Clone)]
pub struct RagChain {
    retriever: Arc<dyn BaseRetriever>,
    generator: AnswerGenerator,
    top_k: usize,
}

impl RagChain {
    pub fn new(retriever: Arc<dyn BaseRetriever>, generator: AnswerGenerator, top_k: usize) -> Self {
        Self {
            retriever,
            generator,
            top_k,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn generator(&self) -> &AnswerGenerator {
        &self.generator
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<SearchResult>, RagError> {
        Ok(self.retriever.retrieve(question, self.top_k).await?)
    }

    pub async fn query(&self, question: &str) -> Result<RagAnswer, RagError> {
        let retrieved = self.retrieve(question).await?;
        tracing::debug!(hits = retrieved.len(), "context retrieved");
        self.generator.generate(question, &retrieved).await
    }

    pub fn query_stream(
        &self,
        question: &str,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<AnswerEvent, RagError>> {
        let chain = self.clone();
        let question = question.to_string();

        async_stream::stream! {
            let retrieved = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RagError::Generation(DocchatError::Cancelled)),
                retrieved = chain.retrieve(&question) => retrieved,
            };
            let retrieved = match retrieved {
                Ok(retrieved) => retrieved,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            tracing::debug!(hits = retrieved.len(), "context retrieved");
            yield Ok(AnswerEvent::Retrieved { sources: source_refs(&retrieved) });

            let mut answer = chain.generator.generate_stream(&question, retrieved, cancel);
            while let Some(event) = answer.next().await {
                yield event;
            }
        }
        .boxed()
    }
}
