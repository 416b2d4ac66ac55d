//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: never healthy; used when embeddings are not configured.
//! - **[`OllamaProvider`]**: calls an Ollama-compatible service's
//!   `/api/embeddings` endpoint, trying each configured URL in order.
//!
//! Also provides vector utilities for the local vector table:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Endpoint fallback
//!
//! Connection failures (refused, timeout) move on to the next URL. An HTTP
//! error response from a reachable service is final: the service is up but
//! cannot embed, so the call fails with `embedding_failed`. When no URL is
//! reachable the call fails with `embedding_unavailable`. There is no retry
//! loop beyond the fallback list.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{DocsError, Result};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;

    /// Whether at least one endpoint answers.
    async fn health(&self) -> bool;

    /// Models the service has available.
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Embed a single text. Long inputs are truncated by the provider.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ============ Disabled Provider ============

/// Provider used when `embedding.provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn health(&self) -> bool {
        false
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(DocsError::EmbeddingUnavailable(
            "embeddings are disabled".to_string(),
        ))
    }
}

// ============ Ollama Provider ============

/// Embedding provider for an Ollama-compatible service.
///
/// Requires an embedding model pulled on the server
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    urls: Vec<String>,
    max_chars: usize,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if config.urls.is_empty() {
            return Err(DocsError::InvalidInput(
                "embedding.urls must list at least one endpoint".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            urls: config
                .urls
                .iter()
                .map(|u| u.trim_end_matches('/').to_string())
                .collect(),
            max_chars: config.max_chars,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health(&self) -> bool {
        for url in &self.urls {
            match self.client.get(format!("{}/", url)).send().await {
                Ok(resp) if resp.status().is_success() => return true,
                Ok(resp) => debug!(url = %url, status = %resp.status(), "embedding health check failed"),
                Err(e) => debug!(url = %url, error = %e, "embedding endpoint unreachable"),
            }
        }
        false
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let mut last_err = None;
        for url in &self.urls {
            match self.client.get(format!("{}/api/tags", url)).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if !status.is_success() {
                        return Err(DocsError::EmbeddingFailed(format!(
                            "{} returned {}",
                            url, status
                        )));
                    }
                    let tags: TagsResponse = resp.json().await?;
                    return Ok(tags.models.into_iter().map(|m| m.name).collect());
                }
                Err(e) => last_err = Some(format!("{}: {}", url, e)),
            }
        }
        Err(DocsError::EmbeddingUnavailable(
            last_err.unwrap_or_else(|| "no endpoints configured".to_string()),
        ))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let prompt = truncate_chars(text, self.max_chars);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
        });

        let mut last_err = None;
        for url in &self.urls {
            let resp = self
                .client
                .post(format!("{}/api/embeddings", url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        let body_text = response.text().await.unwrap_or_default();
                        return Err(DocsError::EmbeddingFailed(format!(
                            "Ollama API error {}: {}",
                            status, body_text
                        )));
                    }
                    let parsed: EmbeddingResponse = response
                        .json()
                        .await
                        .map_err(|e| DocsError::EmbeddingFailed(e.to_string()))?;
                    if parsed.embedding.is_empty() {
                        return Err(DocsError::EmbeddingFailed(
                            "Ollama returned an empty embedding".to_string(),
                        ));
                    }
                    return Ok(parsed.embedding);
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "embedding endpoint unreachable, trying next");
                    last_err = Some(format!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        url, e
                    ));
                }
            }
        }

        Err(DocsError::EmbeddingUnavailable(
            last_err.unwrap_or_else(|| "no endpoints configured".to_string()),
        ))
    }
}

/// Build the provider named by `embedding.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => Err(DocsError::InvalidInput(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// First `max_chars` characters of `text`, never splitting a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing partial floats are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
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

/// Deterministic letter-frequency embedder for unit tests.
#[cfg(test)]
pub(crate) struct LetterEmbedder {
    pub fail: bool,
}

#[cfg(test)]
#[async_trait]
impl EmbeddingProvider for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }

    async fn health(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["letters".to_string()])
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            return Err(DocsError::EmbeddingFailed("model not loaded".to_string()));
        }
        let mut v = vec![0.0f32; 26];
        for c in text.chars().filter(char::is_ascii_alphabetic) {
            v[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[tokio::test]
    async fn test_disabled_provider() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert!(!provider.health().await);
        let err = provider.embed("hi").await.unwrap_err();
        assert_eq!(err.kind(), "embedding_unavailable");
    }
}
