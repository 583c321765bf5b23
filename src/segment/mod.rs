//! Segmentation Engine: splits document text into offset-tagged chunks.
//!
//! Every algorithm reports character offsets into the original text with
//! `0 <= start < end <= len`, emits chunks in document order and terminates
//! whatever its overlap parameters are.

pub mod length;
pub mod n_sentence;
pub mod paragraph;
pub mod params;
pub mod semantic;
pub mod sentences;
pub mod text_index;
pub mod window;

pub use params::{
    NSentenceParams, ParagraphParams, SegmentationMethod, SemanticParams, SentenceWindowParams,
    StrategySpec, TokenWindowParams,
};
pub use sentences::{PunctuationTokenizer, SentenceTokenizer};
pub use text_index::TextIndex;

use crate::embeddings::EmbedderRegistry;
use crate::error::{EvalError, Result};
use crate::model::Segment;

/// Segment with the default sentence tokenizer.
///
/// Semantic strategies need an embedder; use [`segment_with_embeddings`].
pub fn segment(text: &str, method: &SegmentationMethod) -> Result<Vec<Segment>> {
    segment_with(text, method, &PunctuationTokenizer)
}

/// Segment with a caller-supplied sentence tokenizer.
pub fn segment_with(
    text: &str,
    method: &SegmentationMethod,
    tokenizer: &dyn SentenceTokenizer,
) -> Result<Vec<Segment>> {
    let segments = match method {
        SegmentationMethod::TokenWindow(p) => length::chunk_token_windows(text, p),
        SegmentationMethod::Paragraph(p) => paragraph::split_paragraphs(text, p),
        SegmentationMethod::NSentence(p) => n_sentence::chunk_n_sentences(text, p, tokenizer),
        SegmentationMethod::SentenceWindow(p) => window::chunk_sentence_windows(text, p, tokenizer),
        SegmentationMethod::Semantic(p) => {
            return Err(EvalError::Configuration(format!(
                "semantic segmentation with '{}' needs an embedder registry",
                p.embed_model_name
            )))
        }
    };
    Ok(segments)
}

/// Segment with any method, loading the semantic embedding model from
/// `registry` when needed.
pub async fn segment_with_embeddings(
    text: &str,
    method: &SegmentationMethod,
    tokenizer: &dyn SentenceTokenizer,
    registry: &EmbedderRegistry,
) -> Result<Vec<Segment>> {
    match method {
        SegmentationMethod::Semantic(p) => {
            let embedder = registry.get(&p.embed_model_name).await?;
            semantic::segment_semantic(text, p, tokenizer, embedder.as_ref()).await
        }
        other => segment_with(text, other, tokenizer),
    }
}

/// Parse a strategy and segment `text` with it.
pub async fn segment_strategy(
    text: &str,
    strategy: &StrategySpec,
    registry: &EmbedderRegistry,
) -> Result<Vec<Segment>> {
    let method = SegmentationMethod::from_spec(strategy)?;
    log::info!(
        "Segmenting {} chars with strategy '{}' ({})",
        text.chars().count(),
        strategy.name,
        method.method_type()
    );
    segment_with_embeddings(text, &method, &PunctuationTokenizer, registry).await
}
