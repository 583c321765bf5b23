//! Fixed windows of N sentences with sentence overlap.

use super::params::NSentenceParams;
use super::sentences::{locate_sentences, segment_from_sentences, SentenceTokenizer};
use super::text_index::TextIndex;
use crate::model::Segment;

/// Group sentences into windows of `sentences_per_chunk`, advancing by
/// `sentences_per_chunk - sentence_overlap` (at least one) each step.
///
/// Windows start at every step until the sentences run out, so with overlap
/// the tail of the document also appears in shorter trailing windows.
pub fn chunk_n_sentences(
    text: &str,
    params: &NSentenceParams,
    tokenizer: &dyn SentenceTokenizer,
) -> Vec<Segment> {
    let located = locate_sentences(text, tokenizer.sentences(text));
    let index = TextIndex::new(text);
    let kind = format!("{}-sentence-chunk", params.sentences_per_chunk);
    let step = params.step();

    let mut segments = Vec::new();
    let mut i = 0;
    while i < located.len() {
        let end = (i + params.sentences_per_chunk).min(located.len());
        if let Some(segment) = segment_from_sentences(&index, &located[i..end], &kind) {
            segments.push(segment);
        }
        i += step;
    }

    log::debug!(
        "N-sentence chunking ({} per chunk, step {}) produced {} chunks from {} sentences",
        params.sentences_per_chunk,
        step,
        segments.len(),
        located.len()
    );
    segments
}
