//! Lazily constructed embedders, one per model identifier.

use super::{Embedder, HttpEmbedder};
use crate::config::EmbeddingsConfig;
use crate::error::{EvalError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Builds the embedder for a model identifier.
pub type EmbedderFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn Embedder>> + Send + Sync>;

type Slot = Arc<OnceCell<Arc<dyn Embedder>>>;

/// Shared embedder instances keyed by model identifier.
///
/// Constructed once by the application and passed to whatever needs an
/// embedder. Each model is built at most once even when several tasks ask for
/// it at the same time; a failed construction is returned to the caller and
/// retried on the next request instead of being remembered.
pub struct EmbedderRegistry {
    factory: EmbedderFactory,
    slots: Mutex<HashMap<String, Slot>>,
}

impl EmbedderRegistry {
    pub fn new(factory: EmbedderFactory) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Registry building [`HttpEmbedder`]s from the `[embeddings]` section.
    pub fn from_config(config: &EmbeddingsConfig) -> Self {
        let config = config.clone();
        Self::new(Arc::new(move |model: &str| {
            let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::from_config(&config, model)?);
            Ok(embedder)
        }))
    }

    /// Embedder for `model_id`, constructing it on first use.
    pub async fn get(&self, model_id: &str) -> Result<Arc<dyn Embedder>> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| EvalError::ExternalService("Embedder registry lock poisoned".to_string()))?;
            slots.entry(model_id.to_string()).or_default().clone()
        };

        let embedder = slot
            .get_or_try_init(|| async {
                log::info!("Loading embedding model '{}'", model_id);
                (self.factory)(model_id).map_err(|e| match e {
                    EvalError::ExternalService(_) => e,
                    other => EvalError::ExternalService(format!(
                        "Failed to load embedding model '{}': {}",
                        model_id, other
                    )),
                })
            })
            .await?;
        Ok(embedder.clone())
    }

    /// Number of models constructed so far.
    pub fn loaded(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| slots.values().filter(|slot| slot.initialized()).count())
            .unwrap_or(0)
    }
}
