//! Retrieval Scorer: discounted gain of a ranked retrieval against the
//! weighted ground truth.

use crate::model::{ChunkKey, RelevantChunk, RetrievedChunk, Simulation, SimulationScores};
use std::collections::HashMap;

/// Rank discount `log2(rank + 1)` for a 1-based rank.
pub fn discount(rank: usize) -> f64 {
    (rank as f64 + 1.0).log2()
}

/// Effective relevance `w'` of every weighted chunk.
pub fn effective_relevance(relevant: &[RelevantChunk]) -> HashMap<ChunkKey, f64> {
    relevant
        .iter()
        .filter_map(|r| r.weights.map(|w| (r.chunk, w.effective_relevance)))
        .collect()
}

/// `sum(w'(chunk) * similarity / log2(rank + 1))` over the retrieved list.
///
/// Chunks without a computed `w'` contribute 0.
pub fn actual_gain(retrieved: &[RetrievedChunk], effective: &HashMap<ChunkKey, f64>) -> f64 {
    retrieved
        .iter()
        .filter(|item| item.rank >= 1)
        .map(|item| {
            let weight = effective.get(&item.chunk).copied().unwrap_or(0.0);
            weight * item.similarity / discount(item.rank)
        })
        .sum()
}

/// Best possible gain: ranked relevant chunks in rank order, similarity 1,
/// weighted by intrinsic importance `w` rather than `w'`.
pub fn ideal_gain(relevant: &[RelevantChunk]) -> f64 {
    let k = relevant.len();
    let mut ranked: Vec<(u32, f64)> = relevant
        .iter()
        .filter_map(|r| {
            let rank = r.ideal_rank?;
            let w = r
                .weights
                .map(|w| w.intrinsic_importance)
                .unwrap_or_else(|| crate::weights::intrinsic_importance(rank, k));
            Some((rank, w))
        })
        .collect();
    ranked.sort_by_key(|(rank, _)| *rank);

    ranked
        .into_iter()
        .map(|(rank, w)| w / discount(rank as usize))
        .sum()
}

/// `actual / ideal`, or 0 when the ideal gain is not positive.
pub fn normalized_score(actual: f64, ideal: f64) -> f64 {
    if ideal > 0.0 && ideal.is_finite() {
        actual / ideal
    } else {
        0.0
    }
}

/// Actual, ideal and normalized gain of a retrieval.
pub fn score(retrieved: &[RetrievedChunk], relevant: &[RelevantChunk]) -> SimulationScores {
    let actual = actual_gain(retrieved, &effective_relevance(relevant));
    let ideal = ideal_gain(relevant);
    SimulationScores {
        actual_gain: actual,
        ideal_gain: ideal,
        normalized_score: normalized_score(actual, ideal),
    }
}

/// Score a simulation, replacing any scores it already had.
pub fn score_simulation(simulation: &mut Simulation, relevant: &[RelevantChunk]) -> SimulationScores {
    let scores = score(&simulation.retrieved, relevant);
    log::debug!(
        "Simulation {}: actual {:.4}, ideal {:.4}, normalized {:.4}",
        simulation.id,
        scores.actual_gain,
        scores.ideal_gain,
        scores.normalized_score
    );
    simulation.scores = Some(scores);
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkWeights, Span};

    fn relevant(index: usize, rank: u32, k: usize, effective: f64) -> RelevantChunk {
        RelevantChunk {
            chunk: ChunkKey::new(1, index),
            span: Span::new(index * 10, index * 10 + 10).unwrap(),
            ideal_rank: Some(rank),
            weights: Some(ChunkWeights {
                intrinsic_importance: (k as f64) - f64::from(rank) + 1.0,
                relevance_density: 1.0,
                effective_relevance: effective,
            }),
        }
    }

    fn hit(index: usize, rank: usize, similarity: f64) -> RetrievedChunk {
        RetrievedChunk {
            chunk: ChunkKey::new(1, index),
            rank,
            similarity,
        }
    }

    #[test]
    fn test_actual_gain_example() {
        let relevant = vec![relevant(0, 1, 2, 2.0), relevant(1, 2, 2, 0.0)];
        let retrieved = vec![hit(0, 1, 1.0), hit(1, 2, 0.5)];
        let gain = actual_gain(&retrieved, &effective_relevance(&relevant));
        assert!((gain - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_chunks_contribute_nothing() {
        let relevant = vec![relevant(0, 1, 1, 1.0)];
        let retrieved = vec![hit(7, 1, 0.9), hit(0, 2, 1.0)];
        let gain = actual_gain(&retrieved, &effective_relevance(&relevant));
        assert!((gain - 1.0 / 3f64.log2()).abs() < 1e-12);
        assert_eq!(actual_gain(&[], &effective_relevance(&relevant)), 0.0);
    }

    #[test]
    fn test_ideal_gain_uses_intrinsic_importance() {
        let relevant = vec![relevant(1, 2, 2, 0.0), relevant(0, 1, 2, 0.1)];
        let expected = 2.0 / 2f64.log2() + 1.0 / 3f64.log2();
        assert!((ideal_gain(&relevant) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_zero_ideal_gain_normalizes_to_zero() {
        let scores = score(&[hit(0, 1, 1.0)], &[]);
        assert_eq!(scores.ideal_gain, 0.0);
        assert_eq!(scores.normalized_score, 0.0);
        assert!(!scores.normalized_score.is_nan());
    }

    #[test]
    fn test_perfect_retrieval_scores_one() {
        let relevant = vec![relevant(0, 1, 2, 2.0), relevant(1, 2, 2, 1.0)];
        let scores = score(&[hit(0, 1, 1.0), hit(1, 2, 1.0)], &relevant);
        assert!((scores.normalized_score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rescoring_overwrites() {
        let relevant = vec![relevant(0, 1, 1, 1.0)];
        let mut simulation = Simulation::new("cosine", "m", vec![hit(0, 1, 0.5)]);
        score_simulation(&mut simulation, &relevant);
        let first = simulation.scores.unwrap();
        score_simulation(&mut simulation, &relevant);
        assert_eq!(simulation.scores.unwrap(), first);
        assert!((first.actual_gain - 0.5).abs() < 1e-12);
    }
}
