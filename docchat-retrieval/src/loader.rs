use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use docchat_core::{Document, Value};

use crate::IngestionError;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

fn page_document(path: &Path, page: usize, content: String) -> Document {
    let source = path.to_string_lossy().to_string();
    let mut metadata = HashMap::new();
    metadata.insert("source".to_string(), Value::String(source.clone()));
    metadata.insert("page".to_string(), Value::from(page));

    Document {
        id: format!("{source}#{page}"),
        content,
        metadata,
        embedding: None,
    }
}

/// Loads a UTF-8 text file as a single page.
pub struct TextLoader {
    path: PathBuf,
}

impl TextLoader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<Vec<Document>, IngestionError> {
        let content = fs::read_to_string(&self.path).map_err(|source| IngestionError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(vec![page_document(&self.path, 1, content)])
    }
}

/// Loads a PDF as one document per page, numbered from 1.
pub struct PdfLoader {
    path: PathBuf,
}

impl PdfLoader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[cfg(feature = "pdf")]
    pub fn load(&self) -> Result<Vec<Document>, IngestionError> {
        let bytes = fs::read(&self.path).map_err(|source| IngestionError::Read {
            path: self.path.clone(),
            source,
        })?;
        let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes).map_err(|err| {
            IngestionError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            }
        })?;

        Ok(pages
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(idx, text)| page_document(&self.path, idx + 1, text))
            .collect())
    }

    #[cfg(not(feature = "pdf"))]
    pub fn load(&self) -> Result<Vec<Document>, IngestionError> {
        Err(IngestionError::Parse {
            path: self.path.clone(),
            message: "pdf feature disabled".to_string(),
        })
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Picks a loader by file extension and runs it on the blocking pool.
pub async fn load_file_async(path: PathBuf) -> Result<Vec<Document>, IngestionError> {
    let extension = extension_of(&path);
    let task_path = path.clone();
    let task = match extension.as_str() {
        "pdf" => tokio::task::spawn_blocking(move || PdfLoader::new(task_path).load()),
        ext if TEXT_EXTENSIONS.contains(&ext) => {
            tokio::task::spawn_blocking(move || TextLoader::new(task_path).load())
        }
        _ => return Err(IngestionError::UnsupportedExtension { path, extension }),
    };

    task.await.map_err(|err| IngestionError::Parse {
        path,
        message: format!("loader task failed: {err}"),
    })?
}

/// Loads files in order; the first failure aborts.
pub async fn load_files_async(paths: Vec<PathBuf>) -> Result<Vec<Document>, IngestionError> {
    let mut documents = Vec::new();
    for path in paths {
        documents.extend(load_file_async(path).await?);
    }
    Ok(documents)
}

/// Lists `*.pdf` files directly inside `dir`, sorted by name.
pub async fn discover_pdfs(dir: &Path) -> Result<Vec<PathBuf>, IngestionError> {
    let read_err = |source: std::io::Error| IngestionError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        let path = entry.path();
        let is_file = entry.file_type().await.map_err(read_err)?.is_file();
        if is_file && extension_of(&path) == "pdf" {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
