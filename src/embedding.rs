//! Embedding client abstraction and the OpenAI-compatible implementation.
//!
//! The [`Embedder`] trait is the seam between the pipeline and the external
//! embedding model; tests substitute a deterministic double. The same client
//! embeds chunks at index time and queries at retrieval time — similarity is
//! only meaningful within one embedding space.
//!
//! Also provides the vector utilities used by the SQLite-backed store:
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 BLOB encoding
//! - [`cosine_similarity`] — the similarity metric used at query time
//!
//! # Retry Strategy
//!
//! Transient errors (HTTP 429, 5xx, network) are retried with exponential
//! backoff (1s, 2s, 4s, ... capped at 32s); other client errors fail
//! immediately and the pipeline decides whether the run dies.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::models::sanitize_text;

/// Converts text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. Output is one-to-one and order-preserving
    /// with the input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (e.g. a retrieval query).
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .context("Empty embedding response")
    }

    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;
}

/// Client for an OpenAI-compatible `POST /v1/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    config: EmbeddingConfig,
}

impl OpenAiEmbedder {
    /// Build a client from configuration plus the stored API key.
    ///
    /// A missing key is a configuration error, surfaced here before any
    /// network call is made.
    pub fn new(config: &EmbeddingConfig, api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            bail!("Embedding API key is required");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            config: config.clone(),
        })
    }

    async fn embed_one_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.config.api_base);
        let request = EmbedRequest {
            model: self.config.model.clone(),
            input: texts.to_vec(),
        };

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: EmbedResponse = response
                            .json()
                            .await
                            .context("Failed to parse embedding response")?;
                        let mut data = body.data;
                        // The API documents input order, but sort by index
                        // so a misbehaving proxy can't scramble alignment.
                        data.sort_by_key(|d| d.index);
                        return Ok(data.into_iter().map(|d| d.embedding).collect());
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("Embedding API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Null bytes upset both the API and TEXT columns downstream
        let sanitized: Vec<String> = texts.iter().map(|t| sanitize_text(t)).collect();

        let mut all = Vec::with_capacity(sanitized.len());
        for batch in sanitized.chunks(self.config.batch_size) {
            let embeddings = self.embed_one_batch(batch).await?;
            if embeddings.len() != batch.len() {
                bail!(
                    "Embedding API returned {} vectors for {} inputs",
                    embeddings.len(),
                    batch.len()
                );
            }
            all.extend(embeddings);
        }
        Ok(all)
    }

    fn dims(&self) -> usize {
        self.config.dims
    }
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    index: usize,
    embedding: Vec<f32>,
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty vectors or
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_or_empty() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_missing_api_key_fails_fast() {
        let config = EmbeddingConfig::default();
        assert!(OpenAiEmbedder::new(&config, "").is_err());
        assert!(OpenAiEmbedder::new(&config, "   ").is_err());
        assert!(OpenAiEmbedder::new(&config, "sk-test").is_ok());
    }
}
