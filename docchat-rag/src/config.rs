use std::path::{Path, PathBuf};
use std::time::Duration;

use docchat_core::Device;
use docchat_retrieval::RecursiveCharacterTextSplitter;
use serde::{Deserialize, Serialize};

use crate::RagError;

pub const DEFAULT_DONT_KNOW_ANSWER: &str = "I don't know.";

/// Every tunable of the pipeline. Missing YAML keys fall back to the defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RagConfig {
    /// Bulk ingestion scans this directory; uploads are written here.
    pub documents_dir: PathBuf,
    /// Holds `index.json`.
    pub index_dir: PathBuf,
    pub ollama_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub embed_batch_size: usize,
    pub generation_model: String,
    pub device: Device,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub temperature: f32,
    pub max_new_tokens: u32,
    pub generation_timeout_secs: u64,
    pub max_retries: usize,
    /// Text the model prints right before its answer, e.g. `FINAL ANSWER`.
    pub answer_prefix: Option<String>,
    pub dont_know_answer: String,
    pub max_upload_bytes: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            documents_dir: PathBuf::from("data"),
            index_dir: PathBuf::from("vectorstores/db"),
            ollama_url: "http://localhost:11434".to_string(),
            embedding_model: "all-minilm".to_string(),
            embedding_dimension: 384,
            embed_batch_size: 32,
            generation_model: "llama2".to_string(),
            device: Device::Cpu,
            chunk_size: 500,
            chunk_overlap: 50,
            top_k: 2,
            temperature: 0.5,
            max_new_tokens: 512,
            generation_timeout_secs: 120,
            max_retries: 0,
            answer_prefix: None,
            dont_know_answer: DEFAULT_DONT_KNOW_ANSWER.to_string(),
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

impl RagConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RagError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|err| RagError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, RagError> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|err| RagError::Config(format!("cannot read {}: {err}", path.display())))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), RagError> {
        if self.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".into()));
        }
        if self.embedding_dimension == 0 {
            return Err(RagError::Config(
                "embedding_dimension must be greater than zero".into(),
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::Config("embed_batch_size must be greater than zero".into()));
        }
        if self.generation_timeout_secs == 0 {
            return Err(RagError::Config(
                "generation_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn splitter(&self) -> Result<RecursiveCharacterTextSplitter, RagError> {
        RecursiveCharacterTextSplitter::builder()
            .chunk_size(self.chunk_size)
            .chunk_overlap(self.chunk_overlap)
            .build()
            .map_err(|err| RagError::Config(err.to_string()))
    }
}
