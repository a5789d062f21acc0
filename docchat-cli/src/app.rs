use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use docchat_core::Device;
use docchat_embeddings::OllamaEmbedding;
use docchat_llm::{GenerationOptions, OllamaClient};
use docchat_rag::{open_index, DocChat, RagConfig};

/// Settings that can be given per invocation instead of in the YAML file.
#[derive(Args, Debug, Default)]
pub struct Overrides {
    #[arg(long, global = true, env = "DOCCHAT_DOCUMENTS_DIR")]
    pub documents_dir: Option<PathBuf>,
    #[arg(long, global = true, env = "DOCCHAT_INDEX_DIR")]
    pub index_dir: Option<PathBuf>,
    #[arg(long, global = true, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,
    /// Generation model served by Ollama.
    #[arg(long, global = true, env = "DOCCHAT_MODEL")]
    pub model: Option<String>,
    #[arg(long, global = true, env = "DOCCHAT_EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,
    /// `cpu` or `gpu`.
    #[arg(long, global = true, env = "DOCCHAT_DEVICE")]
    pub device: Option<Device>,
    #[arg(long, global = true, env = "DOCCHAT_TOP_K")]
    pub top_k: Option<usize>,
}

impl Overrides {
    fn apply(&self, config: &mut RagConfig) {
        if let Some(dir) = &self.documents_dir {
            config.documents_dir = dir.clone();
        }
        if let Some(dir) = &self.index_dir {
            config.index_dir = dir.clone();
        }
        if let Some(url) = &self.ollama_url {
            config.ollama_url = url.clone();
        }
        if let Some(model) = &self.model {
            config.generation_model = model.clone();
        }
        if let Some(model) = &self.embedding_model {
            config.embedding_model = model.clone();
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
    }
}

pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<RagConfig> {
    let mut config = match path {
        Some(path) => RagConfig::from_yaml_file(path)?,
        None => RagConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

/// Connects the Ollama backends and opens the persisted index.
pub async fn build(config: RagConfig) -> Result<DocChat> {
    let embedder = OllamaEmbedding::new(
        config.ollama_url.clone(),
        config.embedding_model.clone(),
        config.embedding_dimension,
    )
    .with_device(config.device)
    .with_batch_size(config.embed_batch_size)
    .with_timeout(Duration::from_secs(60))
    .context("cannot create the embedding client")?;

    let llm = OllamaClient::with_timeout(
        config.ollama_url.clone(),
        config.generation_model.clone(),
        config.generation_timeout(),
    )
    .context("cannot create the generation client")?
    .with_options(
        GenerationOptions {
            temperature: Some(config.temperature),
            num_predict: Some(i32::try_from(config.max_new_tokens).unwrap_or(i32::MAX)),
            num_gpu: None,
        }
        .with_device(config.device),
    );

    let index = open_index(&config.index_dir).await?;
    tracing::info!(
        chunks = index.len().await,
        model = %config.generation_model,
        embedding_model = %config.embedding_model,
        device = %config.device,
        "docchat ready"
    );

    Ok(DocChat::builder()
        .with_config(config)
        .with_llm(Arc::new(llm))
        .with_embedder(Arc::new(embedder))
        .with_index(index)
        .build()?)
}
