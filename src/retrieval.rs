//! Retrieval simulation: run a retriever over a segmentation's chunks and
//! turn its hits into a scored [`Simulation`].

use crate::config::RetrievalConfig;
use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::Result;
use crate::model::{Chunk, ChunkKey, RelevantChunk, RetrievedChunk, Simulation};
use crate::scoring;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// One retrievable text with an opaque identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusEntry {
    pub id: String,
    pub text: String,
}

/// Ranks corpus entries for a query.
///
/// Returns at most `top_k` `(id, similarity)` pairs, best first. Identifiers
/// must be ones from `corpus`.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &str;

    /// Model behind the ranking, recorded with each simulation.
    fn model_id(&self) -> &str;

    async fn retrieve(
        &self,
        query: &str,
        corpus: &[CorpusEntry],
        top_k: usize,
    ) -> Result<Vec<(String, f64)>>;
}

/// Dense retrieval by cosine similarity of embeddings.
pub struct EmbeddingRetriever {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingRetriever {
    pub const NAME: &'static str = "embedding-cosine";

    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl Retriever for EmbeddingRetriever {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    async fn retrieve(
        &self,
        query: &str,
        corpus: &[CorpusEntry],
        top_k: usize,
    ) -> Result<Vec<(String, f64)>> {
        if corpus.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = corpus.iter().map(|entry| entry.text.clone()).collect();
        let documents = self.embedder.embed_batch(&texts).await?;
        let query_embedding = self.embedder.embed(query).await?;

        let mut hits: Vec<(String, f64)> = corpus
            .iter()
            .zip(&documents)
            .map(|(entry, embedding)| {
                (
                    entry.id.clone(),
                    f64::from(cosine_similarity(&query_embedding, embedding)),
                )
            })
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1));
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Number of chunks to retrieve for an experiment with `k` relevant chunks.
pub fn retrieval_depth(k: usize, config: &RetrievalConfig) -> usize {
    if k == 0 {
        config.min_k
    } else {
        config.min_k.max(config.relevant_multiplier * k)
    }
}

/// Corpus entries for a segmentation's chunks, keyed by `ChunkKey` display form.
pub fn corpus_for(chunks: &[Chunk]) -> (Vec<CorpusEntry>, HashMap<String, ChunkKey>) {
    let entries = chunks
        .iter()
        .map(|chunk| CorpusEntry {
            id: chunk.key.to_string(),
            text: chunk.text.clone(),
        })
        .collect();
    let ids = chunks.iter().map(|chunk| (chunk.key.to_string(), chunk.key)).collect();
    (entries, ids)
}

/// Map retriever hits back to chunks.
///
/// Hits whose identifier is not in `ids` are dropped with a warning; the
/// remaining hits keep their order and are ranked 1..n.
pub fn build_simulation(
    retriever_name: &str,
    embedding_model: &str,
    hits: Vec<(String, f64)>,
    ids: &HashMap<String, ChunkKey>,
) -> Simulation {
    let retrieved: Vec<RetrievedChunk> = hits
        .into_iter()
        .filter_map(|(id, similarity)| match ids.get(&id) {
            Some(key) => Some((*key, similarity)),
            None => {
                log::warn!("Retriever returned unknown chunk id '{}', dropping it", id);
                None
            }
        })
        .enumerate()
        .map(|(i, (chunk, similarity))| RetrievedChunk {
            chunk,
            rank: i + 1,
            similarity,
        })
        .collect();

    Simulation::new(retriever_name, embedding_model, retrieved)
}

/// Retrieve for `question` over `chunks` and score the result.
///
/// Always returns a new simulation. An empty corpus yields no retrieved
/// chunks and zero scores; retriever failures are returned unchanged.
pub async fn run_simulation(
    retriever: &dyn Retriever,
    question: &str,
    chunks: &[Chunk],
    relevant: &[RelevantChunk],
    config: &RetrievalConfig,
) -> Result<Simulation> {
    let depth = retrieval_depth(relevant.len(), config);
    let (corpus, ids) = corpus_for(chunks);

    let hits = if corpus.is_empty() {
        Vec::new()
    } else {
        retriever.retrieve(question, &corpus, depth).await?
    };

    let mut simulation = build_simulation(retriever.name(), retriever.model_id(), hits, &ids);
    scoring::score_simulation(&mut simulation, relevant);
    log::info!(
        "Retrieved {} of {} chunks (depth {}) with {}",
        simulation.k_retrieved,
        chunks.len(),
        depth,
        retriever.name()
    );
    Ok(simulation)
}
