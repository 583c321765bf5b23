//! Plain data records shared by the segmentation, relevance, weighting and
//! scoring stages. Nothing here holds a live reference to storage; the store
//! module reads and writes these values.

use crate::error::{EvalError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Half-open character interval `[start, end)` over a document's text.
///
/// Offsets count Unicode scalar values, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// Build a span, rejecting empty or inverted intervals.
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if start >= end {
            return Err(EvalError::InvalidInput(format!(
                "span start {} must be before end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open-interval overlap: `other.start < self.end && other.end > self.start`.
    pub fn overlaps(&self, other: &Span) -> bool {
        other.start < self.end && other.end > self.start
    }

    /// Number of characters shared with `other` (0 when disjoint).
    pub fn overlap_len(&self, other: &Span) -> usize {
        if !self.overlaps(other) {
            return 0;
        }
        self.end.min(other.end) - self.start.max(other.start)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Identity of a chunk: (segmentation id, zero-based sequence index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub segmentation_id: i64,
    pub index: usize,
}

impl ChunkKey {
    pub fn new(segmentation_id: i64, index: usize) -> Self {
        Self {
            segmentation_id,
            index,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segmentation_id, self.index)
    }
}

/// Method-specific metadata, tagged by the algorithm that produced the chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Producing algorithm, e.g. `pure_paragraph` or `5-sentence-chunk`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Sentences grouped into the chunk, for sentence-based algorithms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentence_count: Option<usize>,
    /// True when offsets were anchored at the previous chunk instead of located
    /// in the document text.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub approximate_offsets: bool,
}

impl ChunkMetadata {
    pub fn tagged(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            sentence_count: None,
            approximate_offsets: false,
        }
    }

    pub fn with_sentences(mut self, count: usize) -> Self {
        self.sentence_count = Some(count);
        self
    }

    pub fn approximate(mut self, approximate: bool) -> Self {
        self.approximate_offsets = approximate;
        self
    }
}

/// Output of the Segmentation Engine before it is assigned to a segmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    #[serde(rename = "start_char")]
    pub start: usize,
    #[serde(rename = "end_char")]
    pub end: usize,
    pub metadata: Option<ChunkMetadata>,
}

impl Segment {
    pub fn span(&self) -> Span {
        Span {
            start: self.start,
            end: self.end,
        }
    }
}

/// Immutable chunk of a segmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub key: ChunkKey,
    pub text: String,
    pub span: Span,
    pub metadata: Option<ChunkMetadata>,
}

/// Turn engine output into chunks of one segmentation, indexed in order.
pub fn into_chunks(segmentation_id: i64, segments: Vec<Segment>) -> Vec<Chunk> {
    segments
        .into_iter()
        .enumerate()
        .map(|(index, segment)| Chunk {
            key: ChunkKey::new(segmentation_id, index),
            span: segment.span(),
            text: segment.text,
            metadata: segment.metadata,
        })
        .collect()
}

/// Human-annotated ground-truth span for one (document, question) experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantSpan {
    pub span: Span,
    #[serde(default)]
    pub text: Option<String>,
}

impl RelevantSpan {
    pub fn new(start: usize, end: usize) -> Result<Self> {
        Ok(Self {
            span: Span::new(start, end)?,
            text: None,
        })
    }
}

/// Derived weights of a ranked relevant chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkWeights {
    /// w(c) = k - rank + 1
    pub intrinsic_importance: f64,
    /// Fraction of the chunk covered by relevant spans, clamped to [0, 1]
    pub relevance_density: f64,
    /// w'(c) = w(c) * sqrt(density)
    pub effective_relevance: f64,
}

/// A chunk overlapping at least one relevant span for an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantChunk {
    pub chunk: ChunkKey,
    pub span: Span,
    pub ideal_rank: Option<u32>,
    pub weights: Option<ChunkWeights>,
}

impl RelevantChunk {
    /// Fresh record: no rank, no weights.
    pub fn unranked(chunk: &Chunk) -> Self {
        Self {
            chunk: chunk.key,
            span: chunk.span,
            ideal_rank: None,
            weights: None,
        }
    }
}

/// One retrieved chunk at a 1-based rank within a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: ChunkKey,
    pub rank: usize,
    pub similarity: f64,
}

/// Actual, ideal and normalized discounted gain of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SimulationScores {
    pub actual_gain: f64,
    pub ideal_gain: f64,
    pub normalized_score: f64,
}

/// One retrieval run for an (experiment, segmentation) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub id: Uuid,
    pub retriever_name: String,
    pub embedding_model: String,
    pub k_retrieved: usize,
    pub retrieved: Vec<RetrievedChunk>,
    pub scores: Option<SimulationScores>,
    pub ran_at: DateTime<Utc>,
}

impl Simulation {
    /// New run record with a fresh id; scores are filled in by the scorer.
    pub fn new(
        retriever_name: impl Into<String>,
        embedding_model: impl Into<String>,
        retrieved: Vec<RetrievedChunk>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            retriever_name: retriever_name.into(),
            embedding_model: embedding_model.into(),
            k_retrieved: retrieved.len(),
            retrieved,
            scores: None,
            ran_at: Utc::now(),
        }
    }
}
