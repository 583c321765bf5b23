use super::Embedder;
use crate::cache::EmbeddingCache;
use crate::config::EmbeddingsConfig;
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest number of inputs accepted per request by OpenAI-compatible APIs.
pub const MAX_BATCH_SIZE: usize = 2048;

/// Request structure for OpenAI-compatible embeddings APIs
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Response structure from OpenAI-compatible embeddings APIs
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Individual embedding data in API response
#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Embeddings client for any endpoint speaking the OpenAI `/embeddings` protocol
/// (OpenAI itself, text-embeddings-inference, vLLM, Ollama...).
///
/// Requests are split into batches of at most `batch_size` texts. Text
/// embeddings are kept in a bounded LRU cache so repeated corpora and queries
/// do not hit the network twice. Failures are never retried.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    batch_size: usize,
    cache: EmbeddingCache,
}

impl HttpEmbedder {
    /// Create a new embedder
    ///
    /// # Arguments
    ///
    /// * `api_base` - Base URL, e.g. `https://api.openai.com/v1`
    /// * `api_key` - Bearer token, if the endpoint needs one
    /// * `model` - Model identifier sent with every request
    /// * `batch_size` - Maximum texts per request (capped at 2048)
    /// * `cache_capacity` - Number of text embeddings kept in memory
    /// * `timeout` - Per-request timeout
    pub fn new(
        api_base: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        batch_size: usize,
        cache_capacity: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EvalError::ExternalService(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", api_base.trim_end_matches('/')),
            api_key,
            model: model.into(),
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            cache: EmbeddingCache::new(cache_capacity),
        })
    }

    /// Build an embedder for `model` from the `[embeddings]` configuration.
    ///
    /// The `openai` provider requires the API key variable to be set; other
    /// providers send it only when present.
    pub fn from_config(config: &EmbeddingsConfig, model: &str) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());

        if api_key.is_none() && config.provider == "openai" {
            return Err(EvalError::ExternalService(format!(
                "{} environment variable is required for the openai embeddings provider",
                config.api_key_env
            )));
        }

        Self::new(
            &config.api_base,
            api_key,
            model,
            config.batch_size,
            config.cache_capacity,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Make a single API request
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = std::time::Instant::now();
        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| EvalError::ExternalService(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(EvalError::ExternalService(format!(
                "Embeddings API error {} for model '{}': {}",
                status, self.model, body
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EvalError::ExternalService(format!("Failed to parse response: {}", e)))?;

        if result.data.len() != texts.len() {
            return Err(EvalError::ExternalService(format!(
                "Embeddings API returned {} vectors for {} inputs",
                result.data.len(),
                texts.len()
            )));
        }

        let mut data = result.data;
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }

        log::debug!(
            "Embedding API call for {} texts took {:?}",
            texts.len(),
            start.elapsed()
        );
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<Option<Vec<f32>>> = texts.iter().map(|t| self.cache.get(t)).collect();
        let misses: Vec<String> = texts
            .iter()
            .zip(&results)
            .filter(|(_, cached)| cached.is_none())
            .map(|(text, _)| text.clone())
            .collect();

        log::debug!(
            "Embedding {} texts with '{}' ({} cached)",
            texts.len(),
            self.model,
            texts.len() - misses.len()
        );

        let mut fresh = Vec::with_capacity(misses.len());
        for batch in misses.chunks(self.batch_size) {
            let embeddings = self.request(batch).await?;
            for (text, embedding) in batch.iter().zip(&embeddings) {
                self.cache.put(text.clone(), embedding.clone());
            }
            fresh.extend(embeddings);
        }

        let mut fresh = fresh.into_iter();
        for slot in results.iter_mut().filter(|slot| slot.is_none()) {
            *slot = fresh.next();
        }

        results
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| {
                    EvalError::ExternalService("Missing embedding in response".to_string())
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder(batch_size: usize) -> HttpEmbedder {
        HttpEmbedder::new(
            "http://localhost:8080/v1/",
            None,
            "BAAI/bge-small-en-v1.5",
            batch_size,
            10,
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn test_embedder_new() {
        let embedder = embedder(100);
        assert_eq!(embedder.model_id(), "BAAI/bge-small-en-v1.5");
        assert_eq!(embedder.batch_size(), 100);
        assert_eq!(embedder.endpoint(), "http://localhost:8080/v1/embeddings");
    }

    #[test]
    fn test_embedder_batch_size_limit() {
        assert_eq!(embedder(5000).batch_size(), 2048);
        assert_eq!(embedder(2048).batch_size(), 2048);
    }

    #[tokio::test]
    async fn test_cached_texts_skip_network() {
        let embedder = embedder(10);
        embedder.cache.put("hello".to_string(), vec![1.0, 2.0]);
        let result = embedder.embed_batch(&["hello".to_string()]).await.unwrap();
        assert_eq!(result, vec![vec![1.0, 2.0]]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        assert!(embedder(10).embed_batch(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_openai_provider_requires_key() {
        let config = EmbeddingsConfig {
            provider: "openai".to_string(),
            api_key_env: "CHUNKEVAL_TEST_KEY_THAT_IS_NOT_SET".to_string(),
            ..EmbeddingsConfig::default()
        };
        let err = HttpEmbedder::from_config(&config, "text-embedding-3-small").err().unwrap();
        assert!(matches!(err, EvalError::ExternalService(_)));
    }
}
