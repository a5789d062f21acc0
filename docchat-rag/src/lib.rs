use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use docchat_core::{Embedding, Llm};
use docchat_retrieval::{FlatIndex, IngestReport, IngestSource, IngestionPipeline, Retriever};

pub mod adapters;
mod chain;
mod config;
mod error;
mod generate;
mod manager;
mod session;

pub use chain::RagChain;
pub use config::{RagConfig, DEFAULT_DONT_KNOW_ANSWER};
pub use error::RagError;
pub use generate::{filter_answer, source_refs, AnswerEvent, AnswerFilter, AnswerGenerator, RagAnswer};
pub use manager::SessionManager;
pub use session::{
    ChatSession, SessionEvent, SessionHandle, SessionState, UploadedFile, ACCEPTED_MIME_TYPES,
    ASK_FILE_PROMPT, INVALID_UPLOAD_MESSAGE, WELCOME_MESSAGE,
};

#[derive(Clone, Debug)]
pub struct RagQueryRequest {
    pub query: String,
}

/// The assembled application: one shared index, one chain, one ingestion pipeline.
#[derive(Clone)]
pub struct DocChat {
    config: Arc<RagConfig>,
    index: FlatIndex,
    chain: RagChain,
    pipeline: Arc<IngestionPipeline>,
    event_buffer_size: usize,
}

pub struct DocChatBuilder {
    config: RagConfig,
    llm: Option<Arc<dyn Llm>>,
    embedder: Option<Arc<dyn Embedding>>,
    index: Option<FlatIndex>,
    event_buffer_size: usize,
}

impl DocChat {
    pub fn builder() -> DocChatBuilder {
        DocChatBuilder {
            config: RagConfig::default(),
            llm: None,
            embedder: None,
            index: None,
            event_buffer_size: 64,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn chain(&self) -> &RagChain {
        &self.chain
    }

    pub fn documents_dir(&self) -> &Path {
        &self.config.documents_dir
    }

    pub fn event_buffer_size(&self) -> usize {
        self.event_buffer_size
    }

    pub async fn ingest(&self, source: IngestSource) -> Result<IngestReport, RagError> {
        Ok(self.pipeline.ingest(source).await?)
    }

    /// Rebuilds the index from the configured documents directory.
    pub async fn ingest_documents_dir(&self) -> Result<IngestReport, RagError> {
        self.ingest(IngestSource::Directory(self.config.documents_dir.clone()))
            .await
    }

    pub async fn query(&self, request: RagQueryRequest) -> Result<RagAnswer, RagError> {
        self.chain.query(&request.query).await
    }

    pub fn query_stream(
        &self,
        request: RagQueryRequest,
        cancel: CancellationToken,
    ) -> ReceiverStream<Result<AnswerEvent, RagError>> {
        let (output_tx, output_rx) = mpsc::channel(self.event_buffer_size);
        let mut events = self.chain.query_stream(&request.query, cancel);

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if output_tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        ReceiverStream::new(output_rx)
    }
}

impl DocChatBuilder {
    pub fn with_config(mut self, config: RagConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedding>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Shares an existing index handle; otherwise an empty one is created.
    pub fn with_index(mut self, index: FlatIndex) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_documents_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.documents_dir = dir.into();
        self
    }

    pub fn with_index_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.index_dir = dir.into();
        self
    }

    pub fn with_event_buffer_size(mut self, event_buffer_size: usize) -> Self {
        if event_buffer_size > 0 {
            self.event_buffer_size = event_buffer_size;
        }
        self
    }

    pub fn build(self) -> Result<DocChat, RagError> {
        self.config.validate()?;
        let llm = self
            .llm
            .ok_or_else(|| RagError::Config("a language model is required".into()))?;
        let embedder = self
            .embedder
            .ok_or_else(|| RagError::Config("an embedder is required".into()))?;
        if embedder.dimension() != self.config.embedding_dimension {
            return Err(RagError::Config(format!(
                "embedder produces {} dimensions but embedding_dimension is {}",
                embedder.dimension(),
                self.config.embedding_dimension
            )));
        }

        let index = self.index.unwrap_or_default();
        let retriever = Arc::new(Retriever::new(embedder.clone(), index.clone()));
        let generator = AnswerGenerator::from_config(llm, &self.config);
        let chain = RagChain::new(retriever, generator, self.config.top_k);
        let pipeline = IngestionPipeline::new(
            embedder,
            index.clone(),
            self.config.splitter()?,
            self.config.index_dir.clone(),
        );

        Ok(DocChat {
            config: Arc::new(self.config),
            index,
            chain,
            pipeline: Arc::new(pipeline),
            event_buffer_size: self.event_buffer_size,
        })
    }
}

/// Loads the persisted index, or starts empty when none exists yet.
pub async fn open_index(index_dir: &Path) -> Result<FlatIndex, RagError> {
    match FlatIndex::load(index_dir).await {
        Ok(index) => Ok(index),
        Err(docchat_core::StoreError::IndexNotFound { path }) => {
            tracing::warn!(path = %path.display(), "no index yet, starting empty");
            Ok(FlatIndex::new())
        }
        Err(err) => Err(RagError::Retrieval(err.into())),
    }
}
