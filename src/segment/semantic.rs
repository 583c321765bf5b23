//! Embedding-driven segmentation.
//!
//! Each sentence is embedded together with `buffer_size` neighbours on both
//! sides. A chunk ends after sentence `i` when the cosine distance between
//! the combined embeddings of `i` and `i + 1` is strictly above the
//! configured percentile of all such distances.

use super::params::SemanticParams;
use super::sentences::{locate_sentences, segment_from_sentences, SentenceTokenizer};
use super::text_index::TextIndex;
use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::{EvalError, Result};
use crate::model::Segment;

pub const KIND: &str = "semantic";

/// Each sentence joined with up to `buffer_size` neighbours on each side.
pub fn combine_sentences(sentences: &[String], buffer_size: usize) -> Vec<String> {
    (0..sentences.len())
        .map(|i| {
            let from = i.saturating_sub(buffer_size);
            let to = (i + buffer_size + 1).min(sentences.len());
            sentences[from..to].join(" ")
        })
        .collect()
}

/// `1 - cosine similarity` between consecutive embeddings.
pub fn cosine_distances(embeddings: &[Vec<f32>]) -> Vec<f64> {
    embeddings
        .windows(2)
        .map(|pair| 1.0 - f64::from(cosine_similarity(&pair[0], &pair[1])))
        .collect()
}

/// Percentile with linear interpolation between closest ranks.
///
/// Returns NaN for an empty slice. `percentile` is clamped to [0, 100].
pub fn percentile(values: &[f64], percentile: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = percentile.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Indices `i` after which a new chunk starts.
pub fn breakpoints(distances: &[f64], percentile_threshold: f64) -> Vec<usize> {
    let threshold = percentile(distances, percentile_threshold);
    distances
        .iter()
        .enumerate()
        .filter(|(_, &d)| d > threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Split text at semantic breakpoints.
///
/// The embedder must serve `params.embed_model_name`; its failures are
/// returned as `ExternalService` errors.
pub async fn segment_semantic(
    text: &str,
    params: &SemanticParams,
    tokenizer: &dyn SentenceTokenizer,
    embedder: &dyn Embedder,
) -> Result<Vec<Segment>> {
    let located = locate_sentences(text, tokenizer.sentences(text));
    if located.is_empty() {
        return Ok(Vec::new());
    }
    let index = TextIndex::new(text);

    let groups: Vec<std::ops::Range<usize>> = if located.len() == 1 {
        vec![0..1]
    } else {
        let sentence_texts: Vec<String> = located.iter().map(|s| s.text.clone()).collect();
        let combined = combine_sentences(&sentence_texts, params.buffer_size);
        let embeddings = embedder.embed_batch(&combined).await.map_err(|e| match e {
            EvalError::ExternalService(_) => e,
            other => EvalError::ExternalService(other.to_string()),
        })?;
        if embeddings.len() != combined.len() {
            return Err(EvalError::ExternalService(format!(
                "Model '{}' returned {} embeddings for {} sentences",
                embedder.model_id(),
                embeddings.len(),
                combined.len()
            )));
        }

        let distances = cosine_distances(&embeddings);
        let mut groups = Vec::new();
        let mut start = 0;
        for i in breakpoints(&distances, params.breakpoint_percentile_threshold) {
            groups.push(start..i + 1);
            start = i + 1;
        }
        if start < located.len() {
            groups.push(start..located.len());
        }
        groups
    };

    let segments: Vec<Segment> = groups
        .into_iter()
        .filter_map(|range| segment_from_sentences(&index, &located[range], KIND))
        .collect();

    log::debug!(
        "Semantic chunking with '{}' produced {} chunks from {} sentences",
        params.embed_model_name,
        segments.len(),
        located.len()
    );
    Ok(segments)
}
