pub mod http;
pub mod registry;

pub use http::HttpEmbedder;
pub use registry::{EmbedderFactory, EmbedderRegistry};

use crate::error::Result;
use async_trait::async_trait;

/// Turns text into dense vectors.
///
/// Implementations make a blocking call to some backend with no automatic
/// retry; a failure is an `ExternalService` error for the caller to surface.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the model behind this embedder.
    fn model_id(&self) -> &str;

    /// Embed every text, returning one vector per input in the same order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings.pop().ok_or_else(|| {
            crate::error::EvalError::ExternalService(format!(
                "Empty embedding response from model '{}'",
                self.model_id()
            ))
        })
    }
}

/// Cosine similarity between two vectors, 0.0 if either has zero magnitude
/// or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
