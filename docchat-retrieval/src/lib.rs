mod base_retriever;
mod error;
mod hash_embedder;
mod index;
mod indexer;
mod ingest;
mod loader;
mod retriever;
mod splitter;

use std::path::PathBuf;

use docchat_core::Document;

pub use base_retriever::BaseRetriever;
pub use error::{IngestionError, RetrievalError, RetrievalResult};
pub use hash_embedder::HashEmbedder;
pub use index::{FlatIndex, IndexEntry, INDEX_FILE_NAME};
pub use indexer::{embed_documents, Indexer};
pub use ingest::{IngestMode, IngestReport, IngestSource, IngestionPipeline};
pub use loader::{discover_pdfs, load_file_async, load_files_async, PdfLoader, TextLoader};
pub use retriever::Retriever;
pub use splitter::{
    Chunk, Chunks, RecursiveCharacterTextSplitter, RecursiveCharacterTextSplitterBuilder,
    SplitterConfigError, DEFAULT_SEPARATORS,
};

pub async fn load_and_split_recursive(
    paths: Vec<PathBuf>,
    splitter: &RecursiveCharacterTextSplitter,
) -> Result<Vec<Document>, IngestionError> {
    let documents = load_files_async(paths).await?;
    Ok(splitter.split_documents(&documents))
}
