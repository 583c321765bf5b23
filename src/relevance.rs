//! Relevance Analyzer: which chunks of a segmentation overlap the ground truth.

use crate::model::{Chunk, ChunkKey, RelevantChunk, RelevantSpan, Span};
use std::collections::HashSet;

/// Relevant chunks of one (experiment, segmentation) pair, in chunk order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelevanceAnalysis {
    pub chunks: Vec<(ChunkKey, Span)>,
}

impl RelevanceAnalysis {
    /// Number of relevant chunks.
    pub fn k(&self) -> usize {
        self.chunks.len()
    }

    pub fn ids(&self) -> Vec<ChunkKey> {
        self.chunks.iter().map(|(key, _)| *key).collect()
    }

    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.chunks.iter().any(|(k, _)| k == key)
    }
}

/// True if `span` overlaps at least one relevant span.
pub fn is_relevant(span: &Span, relevant: &[RelevantSpan]) -> bool {
    relevant.iter().any(|r| span.overlaps(&r.span))
}

/// Canonical form of a ground-truth span set, independent of insertion order.
pub fn ground_truth_key(relevant: &[RelevantSpan]) -> String {
    let mut spans: Vec<Span> = relevant.iter().map(|r| r.span).collect();
    spans.sort();
    spans
        .iter()
        .map(|span| format!("{}-{}", span.start, span.end))
        .collect::<Vec<_>>()
        .join(",")
}

/// Find the chunks overlapping any relevant span.
///
/// No spans or no chunks yields an empty analysis (k = 0).
pub fn analyze(chunks: &[Chunk], relevant: &[RelevantSpan]) -> RelevanceAnalysis {
    if relevant.is_empty() {
        return RelevanceAnalysis::default();
    }

    let mut found: Vec<(ChunkKey, Span)> = chunks
        .iter()
        .filter(|chunk| is_relevant(&chunk.span, relevant))
        .map(|chunk| (chunk.key, chunk.span))
        .collect();
    found.sort_by_key(|(key, _)| *key);

    log::debug!(
        "{} of {} chunks overlap {} relevant spans",
        found.len(),
        chunks.len(),
        relevant.len()
    );
    RelevanceAnalysis { chunks: found }
}

/// Records to insert so the stored relevant set matches `analysis`.
///
/// Existing records are never returned, so their ranks and weights are left
/// as they are; running this twice with the same inputs returns nothing the
/// second time.
pub fn reconcile(existing: &[RelevantChunk], analysis: &RelevanceAnalysis) -> Vec<RelevantChunk> {
    let known: HashSet<ChunkKey> = existing.iter().map(|r| r.chunk).collect();

    let stale = existing
        .iter()
        .filter(|r| !analysis.contains(&r.chunk))
        .count();
    if stale > 0 {
        log::warn!(
            "{} stored relevant chunk(s) no longer overlap the ground truth",
            stale
        );
    }

    analysis
        .chunks
        .iter()
        .filter(|(key, _)| !known.contains(key))
        .map(|(key, span)| RelevantChunk {
            chunk: *key,
            span: *span,
            ideal_rank: None,
            weights: None,
        })
        .collect()
}
