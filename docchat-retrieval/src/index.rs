use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use docchat_core::{Document, SearchResult, StoreError, Value, VectorStore};

pub const INDEX_FILE_NAME: &str = "index.json";
const FORMAT_VERSION: u32 = 1;
const METRIC: &str = "cosine";

/// One indexed chunk: its vector, its text and the metadata it was loaded with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub embedding: Vec<f32>,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl IndexEntry {
    pub fn from_document(mut document: Document) -> Result<Self, StoreError> {
        if document.id.trim().is_empty() {
            return Err(StoreError::InvalidId(document.id));
        }
        let embedding = document
            .embedding
            .take()
            .ok_or_else(|| StoreError::MissingEmbedding {
                id: document.id.clone(),
            })?;
        Ok(Self {
            id: document.id,
            embedding,
            text: document.content,
            metadata: document.metadata,
        })
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }

    fn to_document(&self) -> Document {
        Document {
            id: self.id.clone(),
            content: self.text.clone(),
            metadata: self.metadata.clone(),
            embedding: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct IndexState {
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
    dimension: Option<usize>,
}

impl IndexState {
    fn check_dimension(&mut self, got: usize) -> Result<(), StoreError> {
        match self.dimension {
            Some(expected) if expected != got => Err(StoreError::DimensionMismatch { expected, got }),
            Some(_) => Ok(()),
            None => {
                self.dimension = Some(got);
                Ok(())
            }
        }
    }

    fn upsert(&mut self, entry: IndexEntry) -> Result<(), StoreError> {
        self.check_dimension(entry.embedding.len())?;
        match self.positions.get(&entry.id) {
            Some(&idx) => self.entries[idx] = entry,
            None => {
                self.positions.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
        Ok(())
    }

    /// Drops entries matching `remove` and returns how many went away.
    fn retain_except(&mut self, remove: impl Fn(&IndexEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !remove(entry));
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.id.clone(), idx))
            .collect();
        before - self.entries.len()
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>, StoreError> {
        let Some(expected) = self.dimension else {
            return Ok(Vec::new());
        };
        if expected != vector.len() {
            return Err(StoreError::DimensionMismatch {
                expected,
                got: vector.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let score = cosine_similarity(vector, &entry.embedding);
                (idx, if score.is_nan() { f32::NEG_INFINITY } else { score })
            })
            .collect();

        // Stable: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(idx, score)| SearchResult {
                document: self.entries[idx].to_document(),
                score,
            })
            .collect())
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    metric: String,
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
}

/// Exact cosine-similarity index over every entry.
///
/// Clones share the same state: queries take the read lock and writers the
/// write lock, so a rebuilt index can be swapped in with [`FlatIndex::replace_with`]
/// without readers ever seeing a partial state.
#[derive(Clone, Debug, Default)]
pub struct FlatIndex {
    inner: Arc<RwLock<IndexState>>,
    save_lock: Arc<Mutex<()>>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a fresh index, rejecting entries whose dimension disagrees with the first.
    pub fn build(entries: impl IntoIterator<Item = IndexEntry>) -> Result<Self, StoreError> {
        let mut state = IndexState::default();
        for entry in entries {
            state.upsert(entry)?;
        }
        Ok(Self::from_state(state))
    }

    fn from_state(state: IndexState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn index_path(dir: &Path) -> PathBuf {
        dir.join(INDEX_FILE_NAME)
    }

    pub async fn load(dir: &Path) -> Result<Self, StoreError> {
        let path = Self::index_path(dir);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::IndexNotFound { path });
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let corrupt = |reason: String| StoreError::Corrupt {
            path: path.clone(),
            reason,
        };
        let persisted: PersistedIndex =
            serde_json::from_slice(&bytes).map_err(|err| corrupt(err.to_string()))?;
        if persisted.version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                persisted.version
            )));
        }
        if persisted.metric != METRIC {
            return Err(corrupt(format!("unsupported metric '{}'", persisted.metric)));
        }

        let mut state = IndexState {
            dimension: persisted.dimension,
            ..IndexState::default()
        };
        for entry in persisted.entries {
            state.upsert(entry).map_err(|err| corrupt(err.to_string()))?;
        }

        tracing::info!(path = %path.display(), entries = state.entries.len(), "loaded index");
        Ok(Self::from_state(state))
    }

    /// Writes `index.json` under `dir` through a temporary file and a rename.
    pub async fn save(&self, dir: &Path) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock().await;
        let (bytes, entries) = {
            let state = self.inner.read().await;
            let persisted = PersistedIndex {
                version: FORMAT_VERSION,
                metric: METRIC.to_string(),
                dimension: state.dimension,
                entries: state.entries.clone(),
            };
            let bytes = serde_json::to_vec(&persisted)
                .map_err(|err| StoreError::Internal(Box::new(err)))?;
            (bytes, state.entries.len())
        };

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        let path = Self::index_path(dir);
        let tmp = dir.join(format!("{INDEX_FILE_NAME}.tmp"));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::info!(path = %path.display(), entries, "saved index");
        Ok(())
    }

    /// Best-first cosine matches, at most `k`. An empty index yields nothing.
    pub async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>, StoreError> {
        self.inner.read().await.query(vector, k)
    }

    pub async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), StoreError> {
        let mut state = self.inner.write().await;
        let mut next = state.clone();
        for entry in entries {
            next.upsert(entry)?;
        }
        *state = next;
        Ok(())
    }

    /// Swaps in the contents of a freshly built index.
    pub async fn replace_with(&self, fresh: FlatIndex) {
        let state = match Arc::try_unwrap(fresh.inner) {
            Ok(lock) => lock.into_inner(),
            Err(shared) => shared.read().await.clone(),
        };
        *self.inner.write().await = state;
    }

    /// Replaces every entry from `source` with `entries` in one write.
    pub async fn replace_source(
        &self,
        source: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<usize, StoreError> {
        let mut state = self.inner.write().await;
        let mut next = state.clone();
        let removed = next.retain_except(|entry| entry.source() == Some(source));
        for entry in entries {
            next.upsert(entry)?;
        }
        *state = next;
        Ok(removed)
    }

    pub async fn delete_by_source(&self, source: &str) -> usize {
        self.inner
            .write()
            .await
            .retain_except(|entry| entry.source() == Some(source))
    }

    pub async fn entries(&self) -> Vec<IndexEntry> {
        self.inner.read().await.entries.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    pub async fn dimension(&self) -> Option<usize> {
        self.inner.read().await.dimension
    }
}

#[async_trait::async_trait]
impl VectorStore for FlatIndex {
    async fn add(&self, docs: Vec<Document>) -> Result<(), StoreError> {
        let entries = docs
            .into_iter()
            .map(IndexEntry::from_document)
            .collect::<Result<Vec<_>, _>>()?;
        self.upsert(entries).await
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        self.query(query_embedding, top_k).await
    }

    async fn delete(&self, ids: &[String]) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .retain_except(|entry| ids.contains(&entry.id));
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
