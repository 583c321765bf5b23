//! Rank validation and the Chunk Weight Engine.
//!
//! Weights derive from a manual ordering of the relevant chunks:
//!
//! ```text
//! w(c)       = k - rank(c) + 1
//! density(c) = min(1, sum of overlaps with relevant spans / len(c))
//! w'(c)      = w(c) * sqrt(density(c))
//! ```

use crate::error::{EvalError, RankIssue, RankValidationError, Result};
use crate::model::{ChunkKey, ChunkWeights, RelevantChunk, RelevantSpan, Span};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Check that `ranks` is a bijection onto `1..=k`.
///
/// Every chunk that fails is reported, sorted by chunk; a chunk with no rank
/// is `Missing`, a rank outside `1..=k` is `OutOfRange`, and every chunk
/// sharing a rank with another is `Duplicate`.
pub fn validate_ranks(
    ranks: &[(ChunkKey, Option<u32>)],
    k: usize,
) -> std::result::Result<(), RankValidationError> {
    let mut by_rank: HashMap<u32, usize> = HashMap::new();
    for (_, rank) in ranks {
        if let Some(rank) = rank {
            *by_rank.entry(*rank).or_default() += 1;
        }
    }

    let mut failures: Vec<(ChunkKey, RankIssue)> = ranks
        .iter()
        .filter_map(|(key, rank)| {
            let issue = match *rank {
                None => RankIssue::Missing,
                Some(r) if r == 0 || r as usize > k => RankIssue::OutOfRange { rank: r, k },
                Some(r) if by_rank.get(&r).copied().unwrap_or(0) > 1 => {
                    RankIssue::Duplicate { rank: r }
                }
                Some(_) => return None,
            };
            Some((*key, issue))
        })
        .collect();
    failures.sort_by_key(|(key, _)| *key);

    if failures.is_empty() {
        Ok(())
    } else {
        Err(RankValidationError { k, failures })
    }
}

/// `k - rank + 1`.
pub fn intrinsic_importance(rank: u32, k: usize) -> f64 {
    (k as f64 - f64::from(rank) + 1.0).max(0.0)
}

/// Fraction of `chunk` covered by relevant spans, clamped to [0, 1].
///
/// Overlaps are summed per span, so overlapping annotations may count the
/// same character twice before clamping.
pub fn relevance_density(chunk: &Span, relevant: &[RelevantSpan]) -> f64 {
    let length = chunk.len();
    if length == 0 {
        return 0.0;
    }
    let covered: usize = relevant.iter().map(|r| chunk.overlap_len(&r.span)).sum();
    (covered as f64 / length as f64).clamp(0.0, 1.0)
}

/// Weights of one chunk at `rank` among `k`.
pub fn chunk_weights(chunk: &Span, rank: u32, k: usize, relevant: &[RelevantSpan]) -> ChunkWeights {
    let intrinsic_importance = intrinsic_importance(rank, k);
    let relevance_density = relevance_density(chunk, relevant);
    ChunkWeights {
        intrinsic_importance,
        relevance_density,
        effective_relevance: intrinsic_importance * relevance_density.sqrt(),
    }
}

/// Recompute weights for every ranked record.
///
/// Records are returned in the same order with their weights overwritten.
/// If no record is ranked yet nothing is computed. Otherwise the ranks must
/// already be a bijection onto `1..=k`; on failure no record is returned, so
/// the caller has nothing partial to persist. With no relevant spans every
/// density and effective relevance is 0.
pub fn compute_weights(
    records: &[RelevantChunk],
    relevant: &[RelevantSpan],
    k: usize,
) -> Result<Vec<RelevantChunk>> {
    if records.iter().all(|r| r.ideal_rank.is_none()) {
        return Ok(records.to_vec());
    }
    check_size(records.len(), k)?;

    let ranks: Vec<(ChunkKey, Option<u32>)> =
        records.iter().map(|r| (r.chunk, r.ideal_rank)).collect();
    validate_ranks(&ranks, k)?;

    if relevant.is_empty() {
        log::warn!("No relevant spans for {} ranked chunk(s); weights set to 0", k);
    }

    Ok(records
        .iter()
        .map(|record| {
            let mut updated = record.clone();
            updated.weights = record
                .ideal_rank
                .map(|rank| chunk_weights(&record.span, rank, k, relevant));
            updated
        })
        .collect())
}

/// Apply a complete ranking submitted for the relevant chunks.
///
/// The submitted chunks must be exactly the stored relevant chunks and their
/// ranks a bijection onto `1..=k`. Every problem is reported in one
/// validation error and nothing changes. On success the full record set is
/// returned with ranks and weights, ready to be written in one transaction.
/// With `k = 0` any submitted ranks are ignored.
pub fn assign_ranks(
    records: &[RelevantChunk],
    submitted: &HashMap<ChunkKey, u32>,
    relevant: &[RelevantSpan],
    k: usize,
) -> Result<Vec<RelevantChunk>> {
    if k == 0 {
        if !submitted.is_empty() {
            log::info!(
                "Ignoring {} submitted rank(s): no relevant chunks",
                submitted.len()
            );
        }
        return Ok(records.to_vec());
    }
    check_size(records.len(), k)?;

    let known: HashSet<ChunkKey> = records.iter().map(|r| r.chunk).collect();
    let mut ranks: BTreeMap<ChunkKey, Option<u32>> = records
        .iter()
        .map(|r| (r.chunk, submitted.get(&r.chunk).copied()))
        .collect();

    let pairs: Vec<(ChunkKey, Option<u32>)> = ranks.iter().map(|(key, rank)| (*key, *rank)).collect();
    let mut failures = match validate_ranks(&pairs, k) {
        Ok(()) => Vec::new(),
        Err(err) => err.failures,
    };
    failures.extend(
        submitted
            .keys()
            .filter(|key| !known.contains(key))
            .map(|key| (*key, RankIssue::Unexpected)),
    );
    if !failures.is_empty() {
        failures.sort_by_key(|(key, _)| *key);
        return Err(RankValidationError { k, failures }.into());
    }

    let ranked: Vec<RelevantChunk> = records
        .iter()
        .map(|record| RelevantChunk {
            ideal_rank: ranks.remove(&record.chunk).flatten(),
            ..record.clone()
        })
        .collect();
    compute_weights(&ranked, relevant, k)
}

fn check_size(records: usize, k: usize) -> Result<()> {
    if records != k {
        return Err(EvalError::InvalidInput(format!(
            "k = {} but {} relevant chunk record(s) are stored",
            k, records
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, start: usize, end: usize, rank: Option<u32>) -> RelevantChunk {
        RelevantChunk {
            chunk: ChunkKey::new(1, index),
            span: Span::new(start, end).unwrap(),
            ideal_rank: rank,
            weights: None,
        }
    }

    fn span(start: usize, end: usize) -> RelevantSpan {
        RelevantSpan::new(start, end).unwrap()
    }

    fn three() -> Vec<RelevantChunk> {
        vec![
            record(0, 0, 100, None),
            record(1, 100, 200, None),
            record(2, 200, 300, None),
        ]
    }

    fn submit(ranks: &[u32]) -> HashMap<ChunkKey, u32> {
        ranks
            .iter()
            .enumerate()
            .map(|(i, r)| (ChunkKey::new(1, i), *r))
            .collect()
    }

    #[test]
    fn test_intrinsic_importance_follows_rank() {
        let ranked = assign_ranks(&three(), &submit(&[1, 2, 3]), &[span(0, 300)], 3).unwrap();
        let w: Vec<f64> = ranked
            .iter()
            .map(|r| r.weights.unwrap().intrinsic_importance)
            .collect();
        assert_eq!(w, vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_density() {
        let chunk = Span::new(0, 100).unwrap();
        assert!((relevance_density(&chunk, &[span(30, 70)]) - 0.4).abs() < 1e-12);
        assert_eq!(relevance_density(&chunk, &[span(100, 150)]), 0.0);
        assert_eq!(relevance_density(&chunk, &[span(0, 80), span(20, 100)]), 1.0);

        let weights = chunk_weights(&chunk, 1, 3, &[span(30, 70)]);
        assert!((weights.effective_relevance - 3.0 * 0.4f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_zero_spans_gives_zero_effective_relevance() {
        let ranked = assign_ranks(&three(), &submit(&[2, 1, 3]), &[], 3).unwrap();
        for r in &ranked {
            let w = r.weights.unwrap();
            assert_eq!(w.relevance_density, 0.0);
            assert_eq!(w.effective_relevance, 0.0);
        }
        assert_eq!(ranked[1].weights.unwrap().intrinsic_importance, 3.0);
    }

    #[test]
    fn test_duplicate_rank_rejected() {
        let err = assign_ranks(&three(), &submit(&[1, 1, 3]), &[span(0, 300)], 3).unwrap_err();
        match err {
            EvalError::Validation(v) => {
                assert_eq!(v.chunks(), vec![ChunkKey::new(1, 0), ChunkKey::new(1, 1)]);
                assert!(v.failures.iter().all(|(_, i)| *i == RankIssue::Duplicate { rank: 1 }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_out_of_range_rank_rejected() {
        let err = assign_ranks(&three(), &submit(&[1, 2, 4]), &[span(0, 300)], 3).unwrap_err();
        match err {
            EvalError::Validation(v) => {
                assert_eq!(
                    v.failures,
                    vec![(ChunkKey::new(1, 2), RankIssue::OutOfRange { rank: 4, k: 3 })]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejection_leaves_stored_weights_untouched() {
        let stored = assign_ranks(&three(), &submit(&[1, 2, 3]), &[span(0, 150)], 3).unwrap();
        let snapshot = stored.clone();
        assert!(assign_ranks(&stored, &submit(&[1, 1, 3]), &[span(0, 150)], 3).is_err());
        assert!(assign_ranks(&stored, &submit(&[1, 2, 4]), &[span(0, 150)], 3).is_err());
        assert_eq!(stored, snapshot);
    }

    #[test]
    fn test_missing_and_unexpected_chunks_itemized() {
        let mut submitted = submit(&[1, 2]);
        submitted.insert(ChunkKey::new(9, 0), 3);
        let err = assign_ranks(&three(), &submitted, &[], 3).unwrap_err();
        match err {
            EvalError::Validation(v) => {
                assert_eq!(
                    v.failures,
                    vec![
                        (ChunkKey::new(1, 2), RankIssue::Missing),
                        (ChunkKey::new(9, 0), RankIssue::Unexpected),
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_k_ignores_ranks() {
        let ranked = assign_ranks(&[], &submit(&[1]), &[], 0).unwrap();
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_compute_weights_without_ranks_is_noop() {
        let records = three();
        assert_eq!(compute_weights(&records, &[span(0, 10)], 3).unwrap(), records);
    }

    #[test]
    fn test_recompute_overwrites_weights() {
        let ranked = assign_ranks(&three(), &submit(&[1, 2, 3]), &[span(0, 50)], 3).unwrap();
        assert!((ranked[0].weights.unwrap().relevance_density - 0.5).abs() < 1e-12);
        let recomputed = compute_weights(&ranked, &[span(0, 100)], 3).unwrap();
        assert_eq!(recomputed[0].weights.unwrap().relevance_density, 1.0);
        assert_eq!(recomputed.len(), 3);
    }
}
