use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use crate::EmbeddingProviderError;
use docchat_core::{Device, Embedding, EmbeddingError};

/// Sentence embeddings served by an Ollama instance (`POST /api/embed`).
#[derive(Clone)]
pub struct OllamaEmbedding {
    base_url: String,
    model: String,
    dimension: usize,
    device: Device,
    batch_size: usize,
    http: Client,
}

impl OllamaEmbedding {
    pub fn new(base_url: String, model: String, dimension: usize) -> Self {
        Self {
            base_url,
            model,
            dimension,
            device: Device::default(),
            batch_size: 32,
            http: Client::new(),
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Texts sent per request by `embed_batch`. Zero is ignored.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        if batch_size > 0 {
            self.batch_size = batch_size;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, EmbeddingError> {
        self.http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| EmbeddingProviderError::Request(err.to_string()))?;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn embed_chunk(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let expected = input.len();
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let req = OllamaEmbedRequest {
            model: self.model.clone(),
            input,
            options: self.device.ollama_num_gpu().map(|num_gpu| OllamaOptions { num_gpu }),
        };
        let response: OllamaEmbedResponse = self
            .http
            .post(url)
            .json(&req)
            .send()
            .await
            .map_err(|err| EmbeddingProviderError::Request(err.to_string()))?
            .error_for_status()
            .map_err(|err| EmbeddingProviderError::Request(err.to_string()))?
            .json()
            .await
            .map_err(|err| EmbeddingProviderError::InvalidResponse(err.to_string()))?;

        if response.embeddings.len() != expected {
            return Err(EmbeddingProviderError::InvalidResponse(format!(
                "expected {expected} embeddings, got {}",
                response.embeddings.len()
            ))
            .into());
        }

        for embedding in &response.embeddings {
            if embedding.len() != self.dimension {
                return Err(EmbeddingProviderError::DimensionMismatch {
                    expected: self.dimension,
                    got: embedding.len(),
                }
                .into());
            }
        }

        Ok(response.embeddings)
    }
}

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_gpu: u32,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedding for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut out = self.embed_chunk(vec![text.to_string()]).await?;
        out.pop().ok_or_else(|| {
            EmbeddingProviderError::InvalidResponse("missing embedding".to_string()).into()
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            tracing::debug!(model = %self.model, batch = chunk.len(), "embedding batch");
            out.extend(self.embed_chunk(chunk.to_vec()).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
