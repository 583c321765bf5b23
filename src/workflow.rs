//! End-to-end steps over the store: segment, analyze, rank, simulate.
//!
//! Each step loads plain records, runs one engine stage and writes the result
//! back, so the binaries only parse arguments and print.

use crate::config::RetrievalConfig;
use crate::embeddings::EmbedderRegistry;
use crate::error::Result;
use crate::model::{ChunkKey, RelevantChunk, Simulation};
use crate::relevance;
use crate::retrieval::{self, Retriever};
use crate::segment;
use crate::stats::{ScoreMatrix, ScoreRun};
use crate::store::{ExperimentRecord, Store, StrategyRecord};
use crate::weights;
use std::collections::HashMap;

/// Relevant chunks of one (experiment, segmentation) pair after analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub segmentation_id: i64,
    pub k: usize,
    /// Records added by this run
    pub inserted: usize,
    pub records: Vec<RelevantChunk>,
}

/// Segmentation of the experiment's document with `strategy`, creating it
/// on first use. Returns the segmentation id.
pub async fn ensure_segmentation(
    store: &Store,
    registry: &EmbedderRegistry,
    experiment: &ExperimentRecord,
    strategy: &StrategyRecord,
) -> Result<i64> {
    if let Some(id) = store
        .find_segmentation(experiment.document_id, strategy.id)
        .await?
    {
        return Ok(id);
    }

    let segments =
        segment::segment_strategy(&experiment.document_text, &strategy.spec, registry).await?;
    store
        .save_segmentation(experiment.document_id, strategy.id, segments)
        .await
}

/// Find the relevant chunks of a segmentation and store any new ones.
///
/// Existing records keep their ranks while the ground truth is unchanged.
/// When spans were added or removed, k is recomputed and ranks that no longer
/// fit the new relevant set are cleared. Stored ranks are re-weighted against
/// the current spans and written back when present.
pub async fn analyze(
    store: &Store,
    experiment_id: i64,
    segmentation_id: i64,
) -> Result<AnalysisOutcome> {
    let chunks = store.load_chunks(segmentation_id).await?;
    let spans = store.load_relevant_spans(experiment_id).await?;
    let analysis = relevance::analyze(&chunks, &spans);
    let k = store
        .ensure_analysis(
            experiment_id,
            segmentation_id,
            analysis.ids(),
            relevance::ground_truth_key(&spans),
        )
        .await?;

    let existing = store
        .load_relevant_chunks(experiment_id, segmentation_id)
        .await?;
    let new_records = relevance::reconcile(&existing, &analysis);
    let inserted = store
        .insert_relevant_chunks(experiment_id, new_records)
        .await?;

    let records = store
        .load_relevant_chunks(experiment_id, segmentation_id)
        .await?;
    let records = if records.iter().any(|r| r.ideal_rank.is_some()) {
        let weighted = weights::compute_weights(&records, &spans, k)?;
        store
            .save_ranked_chunks(experiment_id, weighted.clone())
            .await?;
        weighted
    } else {
        records
    };

    log::info!(
        "Experiment {} / segmentation {}: k = {} ({} new)",
        experiment_id,
        segmentation_id,
        k,
        inserted
    );
    Ok(AnalysisOutcome {
        segmentation_id,
        k,
        inserted,
        records,
    })
}

/// Validate a complete ranking keyed by chunk sequence index and store it
/// with the derived weights. Nothing is written if validation fails.
pub async fn rank(
    store: &Store,
    experiment_id: i64,
    segmentation_id: i64,
    ranks_by_index: &HashMap<usize, u32>,
) -> Result<Vec<RelevantChunk>> {
    let outcome = analyze(store, experiment_id, segmentation_id).await?;
    let spans = store.load_relevant_spans(experiment_id).await?;
    let submitted: HashMap<ChunkKey, u32> = ranks_by_index
        .iter()
        .map(|(index, rank)| (ChunkKey::new(segmentation_id, *index), *rank))
        .collect();

    let ranked = weights::assign_ranks(&outcome.records, &submitted, &spans, outcome.k)?;
    if outcome.k > 0 {
        store
            .save_ranked_chunks(experiment_id, ranked.clone())
            .await?;
    }
    Ok(ranked)
}

/// Run one retrieval over the segmentation's chunks, score it and store it.
pub async fn simulate(
    store: &Store,
    retriever: &dyn Retriever,
    experiment: &ExperimentRecord,
    segmentation_id: i64,
    config: &RetrievalConfig,
) -> Result<Simulation> {
    let chunks = store.load_chunks(segmentation_id).await?;
    let relevant = store
        .load_relevant_chunks(experiment.id, segmentation_id)
        .await?;
    if relevant.iter().any(|r| r.ideal_rank.is_none()) {
        log::warn!(
            "Experiment {} has unranked relevant chunks; they add nothing to the scores",
            experiment.id
        );
    }

    let simulation =
        retrieval::run_simulation(retriever, &experiment.question, &chunks, &relevant, config)
            .await?;
    store
        .save_simulation(experiment.id, segmentation_id, simulation.clone())
        .await?;
    Ok(simulation)
}

/// Latest normalized scores of every stored strategy over every experiment.
pub async fn score_matrix(store: &Store) -> Result<ScoreMatrix> {
    let strategies = store.strategy_names().await?;
    let experiments = store.experiment_ids().await?;
    let runs: Vec<ScoreRun> = store.latest_scores().await?;
    Ok(ScoreMatrix::from_runs(&strategies, &experiments, &runs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::LetterEmbedder;
    use crate::embeddings::{Embedder, EmbedderFactory};
    use crate::error::EvalError;
    use crate::model::RelevantSpan;
    use crate::retrieval::EmbeddingRetriever;
    use crate::segment::StrategySpec;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    const DOC: &str = "Cats purr softly.\n\nDogs bark loudly.\n\nBirds sing at dawn.";

    fn registry() -> EmbedderRegistry {
        let factory: EmbedderFactory = Arc::new(|model: &str| -> Result<Arc<dyn Embedder>> {
            Ok(Arc::new(LetterEmbedder::new(model)))
        });
        EmbedderRegistry::new(factory)
    }

    fn retrieval_config() -> RetrievalConfig {
        RetrievalConfig {
            min_k: 2,
            relevant_multiplier: 2,
        }
    }

    async fn setup() -> (TempDir, Store, ExperimentRecord, i64) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path().join("eval.db")).await.unwrap();
        store
            .upsert_strategy(&StrategySpec {
                name: "paragraphs".to_string(),
                method_type: "structure".to_string(),
                parameters: json!({"structure_type": "pure_paragraph"}),
            })
            .await
            .unwrap();
        let document_id = store.insert_document("animals", DOC).await.unwrap();
        let experiment_id = store
            .insert_experiment(document_id, "Which animal barks?")
            .await
            .unwrap();
        // "Dogs bark loudly." plus the start of the birds paragraph
        store
            .add_relevant_span(experiment_id, &RelevantSpan::new(19, 40).unwrap())
            .await
            .unwrap();

        let experiment = store.load_experiment(experiment_id).await.unwrap();
        let strategy = store.load_strategy("paragraphs").await.unwrap();
        let segmentation_id = ensure_segmentation(&store, &registry(), &experiment, &strategy)
            .await
            .unwrap();
        (temp_dir, store, experiment, segmentation_id)
    }

    #[tokio::test]
    async fn test_segmentation_is_created_once() {
        let (_dir, store, experiment, segmentation_id) = setup().await;
        let strategy = store.load_strategy("paragraphs").await.unwrap();
        let again = ensure_segmentation(&store, &registry(), &experiment, &strategy)
            .await
            .unwrap();
        assert_eq!(again, segmentation_id);
        assert_eq!(store.load_chunks(segmentation_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_changed_strategy_resegments() {
        let (_dir, store, experiment, segmentation_id) = setup().await;
        analyze(&store, experiment.id, segmentation_id).await.unwrap();

        store
            .upsert_strategy(&StrategySpec {
                name: "paragraphs".to_string(),
                method_type: "structure".to_string(),
                parameters: json!({
                    "structure_type": "n_sentence_chunking",
                    "sentences_per_chunk": 3,
                    "sentence_overlap": 0
                }),
            })
            .await
            .unwrap();
        let strategy = store.load_strategy("paragraphs").await.unwrap();
        let resegmented = ensure_segmentation(&store, &registry(), &experiment, &strategy)
            .await
            .unwrap();

        let chunks = store.load_chunks(resegmented).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].metadata.as_ref().unwrap().kind,
            "3-sentence-chunk"
        );
        assert_eq!(analyze(&store, experiment.id, resegmented).await.unwrap().k, 1);
    }

    #[tokio::test]
    async fn test_analyze_is_idempotent() {
        let (_dir, store, experiment, segmentation_id) = setup().await;
        let first = analyze(&store, experiment.id, segmentation_id).await.unwrap();
        assert_eq!(first.k, 2);
        assert_eq!(first.inserted, 2);

        let second = analyze(&store, experiment.id, segmentation_id).await.unwrap();
        assert_eq!(second.k, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.records, first.records);
    }

    #[tokio::test]
    async fn test_new_ground_truth_span_reanalyzes() {
        let (_dir, store, experiment, segmentation_id) = setup().await;
        let ranks: HashMap<usize, u32> = [(1, 1), (2, 2)].into_iter().collect();
        rank(&store, experiment.id, segmentation_id, &ranks)
            .await
            .unwrap();

        // "Cats" now counts too
        store
            .add_relevant_span(experiment.id, &RelevantSpan::new(0, 4).unwrap())
            .await
            .unwrap();
        let outcome = analyze(&store, experiment.id, segmentation_id).await.unwrap();
        assert_eq!(outcome.k, 3);
        assert_eq!(outcome.inserted, 1);
        assert!(outcome.records.iter().all(|r| r.ideal_rank.is_none()));

        let ranks: HashMap<usize, u32> = [(0, 3), (1, 1), (2, 2)].into_iter().collect();
        let ranked = rank(&store, experiment.id, segmentation_id, &ranks)
            .await
            .unwrap();
        let dogs = ranked.iter().find(|r| r.chunk.index == 1).unwrap();
        assert_eq!(dogs.weights.unwrap().intrinsic_importance, 3.0);
    }

    #[tokio::test]
    async fn test_rank_validates_and_weights() {
        let (_dir, store, experiment, segmentation_id) = setup().await;

        let bad: HashMap<usize, u32> = [(1, 1), (2, 1)].into_iter().collect();
        assert!(matches!(
            rank(&store, experiment.id, segmentation_id, &bad).await,
            Err(EvalError::Validation(_))
        ));
        let stored = store
            .load_relevant_chunks(experiment.id, segmentation_id)
            .await
            .unwrap();
        assert!(stored.iter().all(|r| r.ideal_rank.is_none()));

        let good: HashMap<usize, u32> = [(1, 1), (2, 2)].into_iter().collect();
        let ranked = rank(&store, experiment.id, segmentation_id, &good)
            .await
            .unwrap();
        let dogs = ranked.iter().find(|r| r.chunk.index == 1).unwrap();
        let weights = dogs.weights.unwrap();
        assert_eq!(weights.intrinsic_importance, 2.0);
        assert_eq!(weights.relevance_density, 1.0);
        assert_eq!(
            store
                .load_relevant_chunks(experiment.id, segmentation_id)
                .await
                .unwrap(),
            ranked
        );
    }

    #[tokio::test]
    async fn test_simulate_scores_and_feeds_matrix() {
        let (_dir, store, experiment, segmentation_id) = setup().await;
        let ranks: HashMap<usize, u32> = [(1, 1), (2, 2)].into_iter().collect();
        rank(&store, experiment.id, segmentation_id, &ranks)
            .await
            .unwrap();

        let retriever = EmbeddingRetriever::new(Arc::new(LetterEmbedder::new("letters")));
        let simulation = simulate(
            &store,
            &retriever,
            &experiment,
            segmentation_id,
            &retrieval_config(),
        )
        .await
        .unwrap();
        assert_eq!(simulation.k_retrieved, 3);
        let scores = simulation.scores.unwrap();
        assert!(scores.normalized_score >= 0.0);
        assert!(scores.ideal_gain > 0.0);

        let matrix = score_matrix(&store).await.unwrap();
        assert_eq!(matrix.experiments, vec![experiment.id]);
        assert_eq!(
            matrix.scores["paragraphs"],
            vec![Some(scores.normalized_score)]
        );
    }
}
