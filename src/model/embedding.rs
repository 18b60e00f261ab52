//! Sentence embeddings for language instructions.
//!
//! The normalizer only needs `text -> fixed-size vector`; that contract is the
//! [`Embedder`] trait. [`EmbeddingClient`] implements it against an
//! OpenAI-compatible `/embeddings` endpoint, asking the server for vectors of
//! the configured size.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EmbeddingConfig;

/// Anything that can turn an instruction string into a fixed-size vector.
#[allow(async_fn_in_trait)]
pub trait Embedder: Send + Sync {
    /// Length of every vector returned by [`Embedder::embed`].
    fn dimensions(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// A single embedding object returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddingObject {
    /// Index within the request batch.
    index: usize,
    /// The embedding vector.
    embedding: Vec<f64>,
}

/// Top-level response from the embeddings API.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingObject>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for an OpenAI-compatible embeddings API.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model_id: String,
    dimensions: usize,
}

impl EmbeddingClient {
    /// Build a client from the embedding section of the configuration.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build reqwest client for embedding")?;

        Ok(Self {
            http_client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model_id: config.model_id.clone(),
            dimensions: config.dimensions,
        })
    }
}

impl Embedder for EmbeddingClient {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        debug!(model = %self.model_id, text_len = text.len(), "embedding instruction");

        let body = serde_json::json!({
            "model": self.model_id,
            "input": text,
            "dimensions": self.dimensions,
        });

        let resp = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to send embedding request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("embedding API returned {status}: {text}");
        }

        let emb_resp: EmbeddingResponse = resp
            .json()
            .await
            .context("failed to parse embedding response")?;

        first_embedding(emb_resp, self.dimensions)
    }
}

/// Pull the single vector out of a response and check its size.
fn first_embedding(resp: EmbeddingResponse, dimensions: usize) -> Result<Vec<f32>> {
    let embedding = resp
        .data
        .into_iter()
        .min_by_key(|e| e.index)
        .map(|e| e.embedding)
        .context("embedding response contained no vectors")?;

    if embedding.len() != dimensions {
        anyhow::bail!(
            "embedding has {} dimensions, expected {dimensions}",
            embedding.len()
        );
    }
    Ok(embedding.into_iter().map(|v| v as f32).collect())
}
