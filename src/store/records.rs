use super::Store;
use crate::error::{EvalError, Result};
use crate::model::{
    Chunk, ChunkKey, ChunkMetadata, ChunkWeights, RelevantChunk, RelevantSpan, Segment, Simulation,
    Span,
};
use crate::segment::{SegmentationMethod, StrategySpec};
use crate::stats::ScoreRun;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;

/// A stored strategy
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyRecord {
    pub id: i64,
    pub spec: StrategySpec,
}

/// A (document, question) pair with its document text
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRecord {
    pub id: i64,
    pub document_id: i64,
    pub question: String,
    pub document_text: String,
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| EvalError::InvalidInput(format!("Invalid timestamp '{}': {}", raw, e)))
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<(Chunk, Option<String>)> {
    let segmentation_id: i64 = row.get(0)?;
    let seq: i64 = row.get(1)?;
    let start: i64 = row.get(3)?;
    let end: i64 = row.get(4)?;
    Ok((
        Chunk {
            key: ChunkKey::new(segmentation_id, seq as usize),
            text: row.get(2)?,
            span: Span {
                start: start as usize,
                end: end as usize,
            },
            metadata: None,
        },
        row.get(5)?,
    ))
}

fn relevant_chunk_from_row(row: &Row<'_>) -> rusqlite::Result<RelevantChunk> {
    let segmentation_id: i64 = row.get(0)?;
    let seq: i64 = row.get(1)?;
    let start: i64 = row.get(2)?;
    let end: i64 = row.get(3)?;
    let ideal_rank: Option<u32> = row.get(4)?;
    let intrinsic: Option<f64> = row.get(5)?;
    let density: Option<f64> = row.get(6)?;
    let effective: Option<f64> = row.get(7)?;

    let weights = match (intrinsic, density, effective) {
        (Some(intrinsic_importance), Some(relevance_density), Some(effective_relevance)) => {
            Some(ChunkWeights {
                intrinsic_importance,
                relevance_density,
                effective_relevance,
            })
        }
        _ => None,
    };

    Ok(RelevantChunk {
        chunk: ChunkKey::new(segmentation_id, seq as usize),
        span: Span {
            start: start as usize,
            end: end as usize,
        },
        ideal_rank,
        weights,
    })
}

fn document_char_len(conn: &Connection, document_id: i64) -> Result<usize> {
    conn.query_row(
        "SELECT char_len FROM documents WHERE id = ?1",
        params![document_id],
        |row| row.get::<_, i64>(0),
    )
    .optional()?
    .map(|len| len as usize)
    .ok_or_else(|| EvalError::NotFound(format!("document {}", document_id)))
}

impl Store {
    /// Insert or replace a strategy by name, returning its id.
    ///
    /// The strategy is validated first; an invalid one is never stored. If
    /// the method or its parameters change, every segmentation built with
    /// the old definition is deleted along with its chunks, analyses and
    /// simulations, so the next run re-segments.
    pub async fn upsert_strategy(&self, spec: &StrategySpec) -> Result<i64> {
        SegmentationMethod::from_spec(spec)?;
        let spec = spec.clone();
        self.with_connection(move |conn| {
            let parameters = serde_json::to_string(&spec.parameters)?;
            let tx = conn.transaction()?;
            let previous: Option<(i64, String, String)> = tx
                .query_row(
                    "SELECT id, method_type, parameters FROM strategies WHERE name = ?1",
                    params![spec.name],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            if let Some((id, method_type, old_parameters)) = previous {
                if method_type != spec.method_type || old_parameters != parameters {
                    let removed = tx.execute(
                        "DELETE FROM segmentations WHERE strategy_id = ?1",
                        params![id],
                    )?;
                    log::warn!(
                        "Strategy '{}' changed; removed {} segmentation(s) built with the old definition",
                        spec.name,
                        removed
                    );
                }
            }

            let id = tx.query_row(
                "INSERT INTO strategies (name, method_type, parameters) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                     method_type = excluded.method_type,
                     parameters = excluded.parameters
                 RETURNING id",
                params![spec.name, spec.method_type, parameters],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    pub async fn load_strategy(&self, name: &str) -> Result<StrategyRecord> {
        let name = name.to_string();
        self.with_connection(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, method_type, parameters FROM strategies WHERE name = ?1",
                    params![name],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;
            let (id, method_type, parameters) =
                row.ok_or_else(|| EvalError::NotFound(format!("strategy '{}'", name)))?;
            Ok(StrategyRecord {
                id,
                spec: StrategySpec {
                    name,
                    method_type,
                    parameters: serde_json::from_str(&parameters)?,
                },
            })
        })
        .await
    }

    /// Names of all strategies, alphabetically.
    pub async fn strategy_names(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM strategies ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(names)
        })
        .await
    }

    pub async fn insert_document(&self, title: &str, content: &str) -> Result<i64> {
        let title = title.to_string();
        let content = content.to_string();
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO documents (title, content, char_len) VALUES (?1, ?2, ?3)",
                params![title, content, to_i64(content.chars().count())],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Create a question about a document and the experiment evaluating it.
    pub async fn insert_experiment(&self, document_id: i64, question: &str) -> Result<i64> {
        let question = question.to_string();
        self.with_connection(move |conn| {
            document_char_len(conn, document_id)?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO questions (document_id, text) VALUES (?1, ?2)",
                params![document_id, question],
            )?;
            let question_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO experiments (document_id, question_id) VALUES (?1, ?2)",
                params![document_id, question_id],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    pub async fn load_experiment(&self, experiment_id: i64) -> Result<ExperimentRecord> {
        self.with_connection(move |conn| {
            conn.query_row(
                "SELECT e.id, e.document_id, q.text, d.content
                 FROM experiments e
                 JOIN questions q ON q.id = e.question_id
                 JOIN documents d ON d.id = e.document_id
                 WHERE e.id = ?1",
                params![experiment_id],
                |row| {
                    Ok(ExperimentRecord {
                        id: row.get(0)?,
                        document_id: row.get(1)?,
                        question: row.get(2)?,
                        document_text: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| EvalError::NotFound(format!("experiment {}", experiment_id)))
        })
        .await
    }

    /// All experiment ids in creation order.
    pub async fn experiment_ids(&self) -> Result<Vec<i64>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM experiments ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
        .await
    }

    /// Record a ground-truth span; it must lie inside the document.
    pub async fn add_relevant_span(&self, experiment_id: i64, span: &RelevantSpan) -> Result<i64> {
        let span = span.clone();
        self.with_connection(move |conn| {
            let document_id: i64 = conn
                .query_row(
                    "SELECT document_id FROM experiments WHERE id = ?1",
                    params![experiment_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| EvalError::NotFound(format!("experiment {}", experiment_id)))?;
            let len = document_char_len(conn, document_id)?;
            if span.span.end > len {
                return Err(EvalError::InvalidInput(format!(
                    "span {} extends past the end of the document ({} chars)",
                    span.span, len
                )));
            }
            conn.execute(
                "INSERT INTO relevant_spans (experiment_id, start_char, end_char, text)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    experiment_id,
                    to_i64(span.span.start),
                    to_i64(span.span.end),
                    span.text
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn load_relevant_spans(&self, experiment_id: i64) -> Result<Vec<RelevantSpan>> {
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT start_char, end_char, text FROM relevant_spans
                 WHERE experiment_id = ?1 ORDER BY start_char, end_char",
            )?;
            let rows = stmt
                .query_map(params![experiment_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(start, end, text)| -> Result<RelevantSpan> {
                    let mut span = RelevantSpan::new(start as usize, end as usize)?;
                    span.text = text;
                    Ok(span)
                })
                .collect()
        })
        .await
    }

    pub async fn find_segmentation(&self, document_id: i64, strategy_id: i64) -> Result<Option<i64>> {
        self.with_connection(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id FROM segmentations WHERE document_id = ?1 AND strategy_id = ?2",
                    params![document_id, strategy_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    /// Store a document's segmentation and all its chunks in one transaction.
    ///
    /// Chunks are immutable: if the document already has a segmentation for
    /// this strategy, its id is returned and nothing is written.
    pub async fn save_segmentation(
        &self,
        document_id: i64,
        strategy_id: i64,
        segments: Vec<Segment>,
    ) -> Result<i64> {
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM segmentations WHERE document_id = ?1 AND strategy_id = ?2",
                    params![document_id, strategy_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                log::info!(
                    "Document {} already segmented with strategy {} (segmentation {})",
                    document_id,
                    strategy_id,
                    id
                );
                return Ok(id);
            }

            tx.execute(
                "INSERT INTO segmentations (document_id, strategy_id) VALUES (?1, ?2)",
                params![document_id, strategy_id],
            )?;
            let segmentation_id = tx.last_insert_rowid();
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO chunks (segmentation_id, seq, text, start_char, end_char, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (seq, segment) in segments.iter().enumerate() {
                    let metadata = segment
                        .metadata
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?;
                    stmt.execute(params![
                        segmentation_id,
                        to_i64(seq),
                        segment.text,
                        to_i64(segment.start),
                        to_i64(segment.end),
                        metadata
                    ])?;
                }
            }
            tx.commit()?;

            log::info!(
                "Saved segmentation {} with {} chunks",
                segmentation_id,
                segments.len()
            );
            Ok(segmentation_id)
        })
        .await
    }

    /// Chunks of a segmentation in sequence order.
    pub async fn load_chunks(&self, segmentation_id: i64) -> Result<Vec<Chunk>> {
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT segmentation_id, seq, text, start_char, end_char, metadata
                 FROM chunks WHERE segmentation_id = ?1 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map(params![segmentation_id], chunk_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(mut chunk, metadata)| -> Result<Chunk> {
                    chunk.metadata = metadata
                        .map(|raw| serde_json::from_str::<ChunkMetadata>(&raw))
                        .transpose()?;
                    Ok(chunk)
                })
                .collect()
        })
        .await
    }

    /// Record k for an (experiment, segmentation) pair, or check it against
    /// the value recorded earlier.
    ///
    /// `relevant` is the current relevant set and `ground_truth` identifies
    /// the spans it was computed from. Under the same ground truth k is fixed
    /// and a different count is an error. When the ground truth has changed,
    /// k is replaced and records of chunks that are no longer relevant are
    /// deleted; if the relevant set itself changed, every remaining rank and
    /// weight is cleared. All of it happens in one transaction.
    pub async fn ensure_analysis(
        &self,
        experiment_id: i64,
        segmentation_id: i64,
        relevant: Vec<ChunkKey>,
        ground_truth: String,
    ) -> Result<usize> {
        self.with_connection(move |conn| {
            let k = relevant.len();
            let tx = conn.transaction()?;
            let stored: Option<(i64, Option<String>)> = tx
                .query_row(
                    "SELECT k_relevant, ground_truth FROM analyses
                     WHERE experiment_id = ?1 AND segmentation_id = ?2",
                    params![experiment_id, segmentation_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match stored {
                None => {
                    tx.execute(
                        "INSERT INTO analyses (experiment_id, segmentation_id, k_relevant, ground_truth)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![experiment_id, segmentation_id, to_i64(k), ground_truth],
                    )?;
                }
                Some((stored_k, Some(previous))) if previous == ground_truth => {
                    if stored_k as usize != k {
                        return Err(EvalError::InvalidInput(format!(
                            "k for experiment {} / segmentation {} is fixed at {} but analysis found {}",
                            experiment_id, segmentation_id, stored_k, k
                        )));
                    }
                    return Ok(k);
                }
                Some((stored_k, _)) => {
                    let stored_seqs: HashSet<usize> = {
                        let mut stmt = tx.prepare(
                            "SELECT seq FROM relevant_chunks
                             WHERE experiment_id = ?1 AND segmentation_id = ?2",
                        )?;
                        let seqs = stmt
                            .query_map(params![experiment_id, segmentation_id], |row| {
                                row.get::<_, i64>(0)
                            })?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        seqs.into_iter().map(|seq| seq as usize).collect()
                    };
                    let current: HashSet<usize> = relevant
                        .iter()
                        .filter(|key| key.segmentation_id == segmentation_id)
                        .map(|key| key.index)
                        .collect();

                    let stale: Vec<usize> = stored_seqs.difference(&current).copied().collect();
                    {
                        let mut delete = tx.prepare(
                            "DELETE FROM relevant_chunks
                             WHERE experiment_id = ?1 AND segmentation_id = ?2 AND seq = ?3",
                        )?;
                        for seq in &stale {
                            delete.execute(params![experiment_id, segmentation_id, to_i64(*seq)])?;
                        }
                    }

                    let set_changed =
                        !stale.is_empty() || current.iter().any(|seq| !stored_seqs.contains(seq));
                    if set_changed {
                        tx.execute(
                            "UPDATE relevant_chunks
                             SET ideal_rank = NULL, intrinsic_importance = NULL,
                                 relevance_density = NULL, effective_relevance = NULL
                             WHERE experiment_id = ?1 AND segmentation_id = ?2",
                            params![experiment_id, segmentation_id],
                        )?;
                    }
                    tx.execute(
                        "UPDATE analyses SET k_relevant = ?3, ground_truth = ?4
                         WHERE experiment_id = ?1 AND segmentation_id = ?2",
                        params![experiment_id, segmentation_id, to_i64(k), ground_truth],
                    )?;

                    log::warn!(
                        "Ground truth of experiment {} changed: k for segmentation {} {} -> {}, {} stale record(s) removed{}",
                        experiment_id,
                        segmentation_id,
                        stored_k,
                        k,
                        stale.len(),
                        if set_changed { ", ranks cleared" } else { "" }
                    );
                }
            }
            tx.commit()?;
            Ok(k)
        })
        .await
    }

    /// Insert relevant chunk records, ignoring ones already stored.
    /// Returns how many rows were added.
    pub async fn insert_relevant_chunks(
        &self,
        experiment_id: i64,
        records: Vec<RelevantChunk>,
    ) -> Result<usize> {
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO relevant_chunks
                     (experiment_id, segmentation_id, seq, start_char, end_char)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for record in &records {
                    inserted += stmt.execute(params![
                        experiment_id,
                        record.chunk.segmentation_id,
                        to_i64(record.chunk.index),
                        to_i64(record.span.start),
                        to_i64(record.span.end)
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    pub async fn load_relevant_chunks(
        &self,
        experiment_id: i64,
        segmentation_id: i64,
    ) -> Result<Vec<RelevantChunk>> {
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT segmentation_id, seq, start_char, end_char, ideal_rank,
                        intrinsic_importance, relevance_density, effective_relevance
                 FROM relevant_chunks
                 WHERE experiment_id = ?1 AND segmentation_id = ?2
                 ORDER BY seq",
            )?;
            let records = stmt
                .query_map(params![experiment_id, segmentation_id], relevant_chunk_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    /// Overwrite ranks and weights of every given record in one transaction.
    pub async fn save_ranked_chunks(
        &self,
        experiment_id: i64,
        records: Vec<RelevantChunk>,
    ) -> Result<()> {
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "UPDATE relevant_chunks
                     SET ideal_rank = ?4, intrinsic_importance = ?5,
                         relevance_density = ?6, effective_relevance = ?7
                     WHERE experiment_id = ?1 AND segmentation_id = ?2 AND seq = ?3",
                )?;
                for record in &records {
                    let updated = stmt.execute(params![
                        experiment_id,
                        record.chunk.segmentation_id,
                        to_i64(record.chunk.index),
                        record.ideal_rank,
                        record.weights.map(|w| w.intrinsic_importance),
                        record.weights.map(|w| w.relevance_density),
                        record.weights.map(|w| w.effective_relevance)
                    ])?;
                    if updated == 0 {
                        // dropping tx rolls back everything written so far
                        return Err(EvalError::NotFound(format!(
                            "relevant chunk {} for experiment {}",
                            record.chunk, experiment_id
                        )));
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Store a simulation run and its retrieved chunks in one transaction.
    pub async fn save_simulation(
        &self,
        experiment_id: i64,
        segmentation_id: i64,
        simulation: Simulation,
    ) -> Result<()> {
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let scores = simulation.scores;
            tx.execute(
                "INSERT INTO simulations
                 (id, experiment_id, segmentation_id, retriever_name, embedding_model,
                  k_retrieved, actual_gain, ideal_gain, normalized_score, ran_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    simulation.id.to_string(),
                    experiment_id,
                    segmentation_id,
                    simulation.retriever_name,
                    simulation.embedding_model,
                    to_i64(simulation.k_retrieved),
                    scores.map(|s| s.actual_gain),
                    scores.map(|s| s.ideal_gain),
                    scores.map(|s| s.normalized_score),
                    timestamp(&simulation.ran_at)
                ],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO retrieved_chunks (simulation_id, rank, segmentation_id, seq, similarity)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for item in &simulation.retrieved {
                    stmt.execute(params![
                        simulation.id.to_string(),
                        to_i64(item.rank),
                        item.chunk.segmentation_id,
                        to_i64(item.chunk.index),
                        item.similarity
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Normalized score of the most recent scored run of every
    /// (experiment, strategy) pair.
    pub async fn latest_scores(&self) -> Result<Vec<ScoreRun>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sim.experiment_id, st.name, sim.normalized_score, sim.ran_at
                 FROM simulations sim
                 JOIN segmentations seg ON seg.id = sim.segmentation_id
                 JOIN strategies st ON st.id = seg.strategy_id
                 WHERE sim.ran_at = (
                     SELECT MAX(other.ran_at) FROM simulations other
                     WHERE other.experiment_id = sim.experiment_id
                       AND other.segmentation_id = sim.segmentation_id
                 )
                 ORDER BY sim.experiment_id, st.name",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(experiment_id, strategy, score, ran_at)| -> Result<ScoreRun> {
                    Ok(ScoreRun {
                        experiment_id,
                        strategy,
                        normalized_score: score.unwrap_or(f64::NAN),
                        ran_at: parse_timestamp(&ran_at)?,
                    })
                })
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RetrievedChunk, SimulationScores};
    use serde_json::json;
    use tempfile::TempDir;

    async fn store() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path().join("eval.db")).await.unwrap();
        (temp_dir, store)
    }

    fn paragraph_strategy(name: &str) -> StrategySpec {
        StrategySpec {
            name: name.to_string(),
            method_type: "structure".to_string(),
            parameters: json!({"structure_type": "pure_paragraph"}),
        }
    }

    fn segments() -> Vec<Segment> {
        vec![
            Segment {
                text: "First".to_string(),
                start: 0,
                end: 5,
                metadata: Some(ChunkMetadata::tagged("pure_paragraph")),
            },
            Segment {
                text: "Second".to_string(),
                start: 7,
                end: 13,
                metadata: None,
            },
        ]
    }

    async fn seeded() -> (TempDir, Store, i64, i64) {
        let (dir, store) = store().await;
        let strategy_id = store.upsert_strategy(&paragraph_strategy("paragraphs")).await.unwrap();
        let document_id = store.insert_document("doc", "First\n\nSecond").await.unwrap();
        let experiment_id = store.insert_experiment(document_id, "What?").await.unwrap();
        let segmentation_id = store
            .save_segmentation(document_id, strategy_id, segments())
            .await
            .unwrap();
        (dir, store, experiment_id, segmentation_id)
    }

    #[tokio::test]
    async fn test_strategy_upsert_and_validation() {
        let (_dir, store) = store().await;
        let id = store.upsert_strategy(&paragraph_strategy("p")).await.unwrap();
        let again = store.upsert_strategy(&paragraph_strategy("p")).await.unwrap();
        assert_eq!(id, again);
        assert_eq!(store.load_strategy("p").await.unwrap().spec, paragraph_strategy("p"));

        let bad = StrategySpec {
            name: "bad".to_string(),
            method_type: "nope".to_string(),
            parameters: json!({}),
        };
        assert!(matches!(
            store.upsert_strategy(&bad).await,
            Err(EvalError::Configuration(_))
        ));
        assert!(matches!(store.load_strategy("bad").await, Err(EvalError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_segmentation_round_trip_and_immutability() {
        let (_dir, store, experiment_id, segmentation_id) = seeded().await;
        let chunks = store.load_chunks(segmentation_id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].key, ChunkKey::new(segmentation_id, 1));
        assert_eq!(chunks[1].span, Span { start: 7, end: 13 });
        assert_eq!(chunks[0].metadata.as_ref().unwrap().kind, "pure_paragraph");

        let experiment = store.load_experiment(experiment_id).await.unwrap();
        let strategy = store.load_strategy("paragraphs").await.unwrap();
        let again = store
            .save_segmentation(experiment.document_id, strategy.id, vec![])
            .await
            .unwrap();
        assert_eq!(again, segmentation_id);
        assert_eq!(store.load_chunks(segmentation_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_changed_strategy_drops_old_segmentations() {
        let (_dir, store, experiment_id, segmentation_id) = seeded().await;
        store
            .ensure_analysis(
                experiment_id,
                segmentation_id,
                vec![ChunkKey::new(segmentation_id, 0)],
                "0-3".to_string(),
            )
            .await
            .unwrap();
        let experiment = store.load_experiment(experiment_id).await.unwrap();
        let strategy = store.load_strategy("paragraphs").await.unwrap();

        // same definition keeps everything
        store.upsert_strategy(&paragraph_strategy("paragraphs")).await.unwrap();
        assert_eq!(
            store
                .find_segmentation(experiment.document_id, strategy.id)
                .await
                .unwrap(),
            Some(segmentation_id)
        );

        let changed = StrategySpec {
            name: "paragraphs".to_string(),
            method_type: "structure".to_string(),
            parameters: json!({
                "structure_type": "n_sentence_chunking",
                "sentences_per_chunk": 1,
                "sentence_overlap": 0
            }),
        };
        let id = store.upsert_strategy(&changed).await.unwrap();
        assert_eq!(id, strategy.id);
        assert_eq!(store.load_strategy("paragraphs").await.unwrap().spec, changed);
        assert_eq!(
            store
                .find_segmentation(experiment.document_id, strategy.id)
                .await
                .unwrap(),
            None
        );
        assert!(store.load_chunks(segmentation_id).await.unwrap().is_empty());

        let analyses: i64 = store
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM analyses", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(analyses, 0);
    }

    #[tokio::test]
    async fn test_relevant_spans_are_bounded_by_document() {
        let (_dir, store, experiment_id, _) = seeded().await;
        store
            .add_relevant_span(experiment_id, &RelevantSpan::new(1, 9).unwrap())
            .await
            .unwrap();
        assert!(matches!(
            store
                .add_relevant_span(experiment_id, &RelevantSpan::new(10, 99).unwrap())
                .await,
            Err(EvalError::InvalidInput(_))
        ));
        let spans = store.load_relevant_spans(experiment_id).await.unwrap();
        assert_eq!(spans, vec![RelevantSpan::new(1, 9).unwrap()]);
    }

    #[tokio::test]
    async fn test_analysis_k_is_fixed_for_same_ground_truth() {
        let (_dir, store, experiment_id, segmentation_id) = seeded().await;
        let both = vec![
            ChunkKey::new(segmentation_id, 0),
            ChunkKey::new(segmentation_id, 1),
        ];
        let truth = "0-9".to_string();
        assert_eq!(
            store
                .ensure_analysis(experiment_id, segmentation_id, both.clone(), truth.clone())
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .ensure_analysis(experiment_id, segmentation_id, both.clone(), truth.clone())
                .await
                .unwrap(),
            2
        );
        assert!(matches!(
            store
                .ensure_analysis(experiment_id, segmentation_id, both[..1].to_vec(), truth)
                .await,
            Err(EvalError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_changed_ground_truth_replaces_k_and_clears_ranks() {
        let (_dir, store, experiment_id, segmentation_id) = seeded().await;
        let first = ChunkKey::new(segmentation_id, 0);
        let second = ChunkKey::new(segmentation_id, 1);
        store
            .ensure_analysis(experiment_id, segmentation_id, vec![first], "0-3".to_string())
            .await
            .unwrap();
        let chunks = store.load_chunks(segmentation_id).await.unwrap();
        let mut ranked = RelevantChunk::unranked(&chunks[0]);
        store
            .insert_relevant_chunks(experiment_id, vec![ranked.clone()])
            .await
            .unwrap();
        ranked.ideal_rank = Some(1);
        store
            .save_ranked_chunks(experiment_id, vec![ranked])
            .await
            .unwrap();

        // a second span now also covers the second paragraph
        let k = store
            .ensure_analysis(
                experiment_id,
                segmentation_id,
                vec![first, second],
                "0-3,8-10".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(k, 2);
        let records = store
            .load_relevant_chunks(experiment_id, segmentation_id)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ideal_rank, None);

        // the first chunk drops out entirely
        let k = store
            .ensure_analysis(experiment_id, segmentation_id, vec![second], "8-10".to_string())
            .await
            .unwrap();
        assert_eq!(k, 1);
        assert!(store
            .load_relevant_chunks(experiment_id, segmentation_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_relevant_chunks_insert_or_ignore_and_rank() {
        let (_dir, store, experiment_id, segmentation_id) = seeded().await;
        let chunks = store.load_chunks(segmentation_id).await.unwrap();
        let records: Vec<RelevantChunk> = chunks.iter().map(RelevantChunk::unranked).collect();

        assert_eq!(store.insert_relevant_chunks(experiment_id, records.clone()).await.unwrap(), 2);
        assert_eq!(store.insert_relevant_chunks(experiment_id, records.clone()).await.unwrap(), 0);

        let mut ranked = records.clone();
        ranked[0].ideal_rank = Some(2);
        ranked[1].ideal_rank = Some(1);
        ranked[1].weights = Some(ChunkWeights {
            intrinsic_importance: 2.0,
            relevance_density: 0.25,
            effective_relevance: 1.0,
        });
        store.save_ranked_chunks(experiment_id, ranked.clone()).await.unwrap();
        assert_eq!(
            store.load_relevant_chunks(experiment_id, segmentation_id).await.unwrap(),
            ranked
        );

        // a failing batch leaves the stored ranks untouched
        let mut bogus = ranked.clone();
        bogus[0].ideal_rank = Some(7);
        bogus.push(RelevantChunk {
            chunk: ChunkKey::new(segmentation_id, 99),
            ..ranked[0].clone()
        });
        assert!(store.save_ranked_chunks(experiment_id, bogus).await.is_err());
        assert_eq!(
            store.load_relevant_chunks(experiment_id, segmentation_id).await.unwrap(),
            ranked
        );
    }

    #[tokio::test]
    async fn test_simulations_keep_history_and_latest_wins() {
        let (_dir, store, experiment_id, segmentation_id) = seeded().await;
        let retrieved = vec![RetrievedChunk {
            chunk: ChunkKey::new(segmentation_id, 1),
            rank: 1,
            similarity: 0.8,
        }];

        let mut first = Simulation::new("embedding-cosine", "m", retrieved.clone());
        first.scores = Some(SimulationScores {
            normalized_score: 0.2,
            ..SimulationScores::default()
        });
        first.ran_at = Utc::now() - chrono::Duration::seconds(60);
        let mut second = Simulation::new("embedding-cosine", "m", retrieved);
        second.scores = Some(SimulationScores {
            normalized_score: 0.9,
            ..SimulationScores::default()
        });

        store.save_simulation(experiment_id, segmentation_id, first).await.unwrap();
        store.save_simulation(experiment_id, segmentation_id, second).await.unwrap();

        let count: i64 = store
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM simulations", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 2);

        let latest = store.latest_scores().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].strategy, "paragraphs");
        assert_eq!(latest[0].normalized_score, 0.9);
    }
}
