use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::Instrument;

use docchat_core::{Document, Embedding};

use crate::{
    discover_pdfs, embed_documents, load_file_async, load_files_async, FlatIndex, IndexEntry,
    IngestionError, RecursiveCharacterTextSplitter,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestSource {
    /// Rebuild the whole index from the `*.pdf` files in a directory.
    Directory(PathBuf),
    /// Add one file to the live index.
    File(PathBuf),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    Rebuild,
    Append,
}

impl fmt::Display for IngestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestMode::Rebuild => f.write_str("rebuild"),
            IngestMode::Append => f.write_str("append"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Loaded pages.
    pub documents: usize,
    pub chunks: usize,
    pub mode: IngestMode,
}

/// Load, chunk, embed and persist. The only writer of the live index.
pub struct IngestionPipeline {
    embedder: Arc<dyn Embedding>,
    index: FlatIndex,
    splitter: RecursiveCharacterTextSplitter,
    index_dir: PathBuf,
    running: Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(
        embedder: Arc<dyn Embedding>,
        index: FlatIndex,
        splitter: RecursiveCharacterTextSplitter,
        index_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            embedder,
            index,
            splitter,
            index_dir: index_dir.into(),
            running: Mutex::new(()),
        }
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub async fn ingest(&self, source: IngestSource) -> Result<IngestReport, IngestionError> {
        let _running = self.running.lock().await;
        let span = tracing::info_span!("ingest", source = ?source);

        let report = async {
            match &source {
                IngestSource::Directory(dir) => self.rebuild(dir).await,
                IngestSource::File(path) => self.append(path).await,
            }
        }
        .instrument(span)
        .await?;
        tracing::info!(
            documents = report.documents,
            chunks = report.chunks,
            mode = %report.mode,
            "ingestion finished"
        );
        Ok(report)
    }

    async fn rebuild(&self, dir: &Path) -> Result<IngestReport, IngestionError> {
        let dir = &canonical(dir).await?;
        let paths = discover_pdfs(dir).await?;
        if paths.is_empty() {
            return Err(IngestionError::NoDocuments {
                path: dir.to_path_buf(),
            });
        }
        tracing::info!(dir = %dir.display(), files = paths.len(), "rebuilding index");

        let documents = load_files_async(paths).await?;
        let (chunks, entries) = self.embed(&documents, dir).await?;

        let fresh = FlatIndex::build(entries)?;
        fresh.save(&self.index_dir).await?;
        self.index.replace_with(fresh).await;

        Ok(IngestReport {
            documents: documents.len(),
            chunks,
            mode: IngestMode::Rebuild,
        })
    }

    async fn append(&self, path: &Path) -> Result<IngestReport, IngestionError> {
        let path = &canonical(path).await?;
        let documents = load_file_async(path.to_path_buf()).await?;
        let (chunks, entries) = self.embed(&documents, path).await?;

        let source = path.to_string_lossy();
        let replaced = self.index.replace_source(&source, entries).await?;
        if replaced > 0 {
            tracing::info!(source = %source, replaced, "replaced earlier chunks");
        }
        self.index.save(&self.index_dir).await?;

        Ok(IngestReport {
            documents: documents.len(),
            chunks,
            mode: IngestMode::Append,
        })
    }

    async fn embed(
        &self,
        documents: &[Document],
        origin: &Path,
    ) -> Result<(usize, Vec<IndexEntry>), IngestionError> {
        let chunks = self.splitter.split_documents(documents);
        if chunks.is_empty() {
            return Err(IngestionError::NoDocuments {
                path: origin.to_path_buf(),
            });
        }
        let count = chunks.len();

        let embedded = embed_documents(self.embedder.as_ref(), chunks).await?;
        let entries = embedded
            .into_iter()
            .map(IndexEntry::from_document)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((count, entries))
    }
}

/// Absolute form of `path`, so `./data/x.txt` and `data/x.txt` share one
/// `source` key in the index.
async fn canonical(path: &Path) -> Result<PathBuf, IngestionError> {
    tokio::fs::canonicalize(path)
        .await
        .map_err(|source| IngestionError::Read {
            path: path.to_path_buf(),
            source,
        })
}
