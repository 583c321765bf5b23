use crate::model::ChunkKey;
use std::fmt;
use thiserror::Error;

/// Main error type for chunkeval
#[derive(Error, Debug)]
pub enum EvalError {
    /// Unknown segmentation method or malformed parameters
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Rank set is not a bijection onto 1..k
    #[error("Validation error: {0}")]
    Validation(#[from] RankValidationError),

    /// Embedding or retrieval backend failed
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenient Result type using EvalError
pub type Result<T> = std::result::Result<T, EvalError>;

/// Why a single chunk failed rank validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RankIssue {
    /// Rank lies outside 1..=k
    OutOfRange { rank: u32, k: usize },
    /// Rank already used by another chunk
    Duplicate { rank: u32 },
    /// Relevant chunk has no rank
    Missing,
    /// Rank submitted for a chunk that is not in the relevant set
    Unexpected,
}

impl fmt::Display for RankIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankIssue::OutOfRange { rank, k } => write!(f, "rank {} outside 1..={}", rank, k),
            RankIssue::Duplicate { rank } => write!(f, "duplicate rank {}", rank),
            RankIssue::Missing => write!(f, "missing rank"),
            RankIssue::Unexpected => write!(f, "not a relevant chunk"),
        }
    }
}

/// Every chunk that failed rank validation, in chunk order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankValidationError {
    pub k: usize,
    pub failures: Vec<(ChunkKey, RankIssue)>,
}

impl RankValidationError {
    /// Chunks that failed, without the reason.
    pub fn chunks(&self) -> Vec<ChunkKey> {
        self.failures.iter().map(|(key, _)| *key).collect()
    }
}

impl fmt::Display for RankValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ranks must cover 1..={} exactly once; {} chunk(s) rejected:",
            self.k,
            self.failures.len()
        )?;
        for (key, issue) in &self.failures {
            write!(f, " [{}: {}]", key, issue)?;
        }
        Ok(())
    }
}

impl std::error::Error for RankValidationError {}
